use super::{
    apply_alpha, list_wallpapers, parse_wal_scheme, resolve_placeholders, validate_alpha,
    ColorResolver, Palette, StaticBackend, ThemeBackend, ThemeDescriptor, ThemeError, WalBackend,
};
use std::os::unix::fs::PermissionsExt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

fn palette() -> Palette {
    Palette {
        foreground: "#eeeeee".to_owned(),
        background: "#101010".to_owned(),
        colors: std::array::from_fn(|index| format!("#0000{index:02x}")),
    }
}

#[test]
fn apply_alpha_splices_after_hash() {
    assert_eq!(apply_alpha("#112233", "D0"), "#D0112233");
    assert_eq!(apply_alpha("112233", "D0"), "D0112233");
}

#[test]
fn resolve_placeholders_replaces_known_tokens() {
    let resolved = resolve_placeholders(
        "%{F${foreground}}x%{B${background}}%{U${color10}}${color1}",
        &palette(),
    );
    assert_eq!(resolved, "%{F#eeeeee}x%{B#101010}%{U#00000a}#000001");
}

#[test]
fn resolve_placeholders_is_identity_without_tokens() {
    let input = "%{l}plain %{c}text %{r}$HOME {color1} $color2";
    assert_eq!(resolve_placeholders(input, &palette()), input);
}

#[test]
fn resolve_placeholders_leaves_unknown_tokens() {
    assert_eq!(
        resolve_placeholders("${accent}${color16}", &palette()),
        "${accent}${color16}"
    );
}

#[test]
fn validate_alpha_requires_two_hex_digits() {
    assert_eq!(validate_alpha("d0").expect("alpha"), "d0");
    assert_eq!(validate_alpha(" D0 ").expect("alpha"), "D0");
    assert!(matches!(validate_alpha("D"), Err(ThemeError::InvalidAlpha(_))));
    assert!(matches!(validate_alpha("ZZ"), Err(ThemeError::InvalidAlpha(_))));
    assert!(matches!(validate_alpha("FFF"), Err(ThemeError::InvalidAlpha(_))));
}

#[test]
fn resolver_applies_current_alpha_at_resolution_time() {
    let backend = StaticBackend::new(palette());
    let mut descriptor =
        ThemeDescriptor::new(PathBuf::from("/walls"), Some("a.png".to_owned()), "FF")
            .expect("descriptor");

    let before = ColorResolver::new(&descriptor, &backend)
        .resolve("${foreground}")
        .expect("resolve");
    assert_eq!(before, "#FFeeeeee");

    descriptor.set_alpha("80").expect("alpha");
    let after = ColorResolver::new(&descriptor, &backend)
        .resolve("${foreground}")
        .expect("resolve");
    assert_eq!(after, "#80eeeeee");
}

struct CountingBackend {
    calls: AtomicUsize,
}

impl ThemeBackend for CountingBackend {
    fn palette(&self, _image: &Path) -> Result<Palette, ThemeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(palette())
    }

    fn apply_wallpaper(&self, _image: &Path) -> Result<(), ThemeError> {
        Ok(())
    }
}

#[test]
fn resolver_skips_palette_lookup_when_no_tokens_present() {
    let backend = CountingBackend {
        calls: AtomicUsize::new(0),
    };
    let descriptor = ThemeDescriptor::new(PathBuf::from("/walls"), Some("a.png".to_owned()), "FF")
        .expect("descriptor");
    let resolver = ColorResolver::new(&descriptor, &backend);

    assert_eq!(resolver.resolve("1920x30+0+0").expect("resolve"), "1920x30+0+0");
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);

    resolver.resolve("${color3}").expect("resolve");
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn parses_wal_colors_json() {
    let mut colors = String::new();
    for index in 0..16 {
        if index > 0 {
            colors.push(',');
        }
        colors.push_str(&format!("\"color{index}\": \"#1111{index:02x}\""));
    }
    let raw = format!(
        "{{\"wallpaper\": \"/w/a.png\", \"alpha\": \"100\", \"special\": {{\"background\": \"#000000\", \"foreground\": \"#ffffff\", \"cursor\": \"#ffffff\"}}, \"colors\": {{{colors}}}}}"
    );

    let palette = parse_wal_scheme(&raw).expect("parse");
    assert_eq!(palette.foreground, "#ffffff");
    assert_eq!(palette.background, "#000000");
    assert_eq!(palette.colors[15], "#11110f");
    assert_eq!(palette.lookup("color15"), Some("#11110f"));
}

#[test]
fn palette_json_lists_every_placeholder() {
    let json = palette().with_alpha("D0").to_json();
    assert_eq!(json["foreground"], "#D0eeeeee");
    assert_eq!(json["color0"], "#D0000000");
    assert_eq!(json.as_object().expect("object").len(), 18);
}

#[test]
fn lists_wallpapers_sorted_and_files_only() {
    let root = temp_dir("walls");
    fs::create_dir_all(root.join("nested")).expect("mkdir");
    fs::write(root.join("b.png"), "b").expect("write b");
    fs::write(root.join("a.jpg"), "a").expect("write a");

    let names = list_wallpapers(&root).expect("list");
    assert_eq!(names, vec!["a.jpg".to_owned(), "b.png".to_owned()]);
}

#[test]
fn descriptor_picks_random_wallpaper_when_image_missing() {
    let root = temp_dir("random");
    fs::create_dir_all(&root).expect("mkdir");
    fs::write(root.join("only.png"), "x").expect("write");

    let descriptor = ThemeDescriptor::new(root.clone(), None, "ff").expect("descriptor");
    assert_eq!(descriptor.image(), "only.png");
    assert_eq!(descriptor.alpha(), "ff");
    assert_eq!(descriptor.image_path(), root.join("only.png"));
}

#[test]
fn descriptor_reports_empty_wallpaper_dir() {
    let root = temp_dir("empty");
    fs::create_dir_all(&root).expect("mkdir");

    let err = ThemeDescriptor::new(root, None, "FF").expect_err("empty dir");
    assert!(matches!(err, ThemeError::NoWallpapers { .. }));
}

#[test]
fn wal_backend_runs_the_tool_once_per_image() {
    let root = temp_dir("wal");
    fs::create_dir_all(&root).expect("mkdir");
    let cache = root.join("colors.json");
    let calls = root.join("calls.log");
    let colors: Vec<String> = (0..16)
        .map(|index| format!("\\\"color{index}\\\": \\\"#2222{index:02x}\\\""))
        .collect();
    let scheme = format!(
        "{{\\\"special\\\": {{\\\"background\\\": \\\"#000000\\\", \\\"foreground\\\": \\\"#ffffff\\\"}}, \\\"colors\\\": {{{}}}}}",
        colors.join(", ")
    );
    let tool = root.join("wal");
    fs::write(
        &tool,
        format!(
            "#!/bin/sh\necho \"$@\" >> '{}'\nprintf '%s' \"{scheme}\" > '{}'\n",
            calls.display(),
            cache.display()
        ),
    )
    .expect("write wal");
    let mut perms = fs::metadata(&tool).expect("stat").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&tool, perms).expect("chmod");

    let backend = WalBackend::with_cache_file(tool.display().to_string(), cache);
    let image = Path::new("/srv/walls/beach.png");
    let first = backend.palette(image).expect("palette");
    let second = backend.palette(image).expect("cached palette");
    assert_eq!(first, second);
    assert_eq!(first.colors[3], "#222203");

    let log = fs::read_to_string(&calls).expect("calls");
    assert_eq!(log.lines().collect::<Vec<_>>(), vec!["-q -n -s -t -e -i /srv/walls/beach.png"]);
}

#[test]
fn wal_backend_reports_tool_failure() {
    let root = temp_dir("wal-failure");
    fs::create_dir_all(&root).expect("mkdir");
    let tool = root.join("wal");
    fs::write(&tool, "#!/bin/sh\necho 'no image' >&2\nexit 4\n").expect("write wal");
    let mut perms = fs::metadata(&tool).expect("stat").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&tool, perms).expect("chmod");

    let backend = WalBackend::with_cache_file(tool.display().to_string(), root.join("colors.json"));
    match backend.palette(Path::new("/srv/walls/beach.png")) {
        Err(ThemeError::ToolFailure { code, stderr, .. }) => {
            assert_eq!(code, Some(4));
            assert!(stderr.contains("no image"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

fn temp_dir(name: &str) -> PathBuf {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time")
        .as_nanos();
    std::env::temp_dir().join(format!("barkeep-theme-{name}-{ts}"))
}
