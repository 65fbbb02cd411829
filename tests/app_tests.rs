use barkeep::app::{App, AppError};
use barkeep::config::Config;
use barkeep::dispatch::Request;
use barkeep::transport::{send_request, Control};
use serde_json::json;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

struct Fixture {
    root: PathBuf,
    args_log: PathBuf,
    content_log: PathBuf,
    tick_log: PathBuf,
}

impl Fixture {
    fn new(name: &str) -> Self {
        let root = temp_workspace(name);
        fs::create_dir_all(root.join("walls")).expect("mkdir walls");
        fs::write(root.join("walls/beach.png"), b"png").expect("write wallpaper");
        Self {
            args_log: root.join("args.log"),
            content_log: root.join("content.log"),
            tick_log: root.join("tick.log"),
            root,
        }
    }

    /// Fake render program: logs its argv, then appends every input line it reads.
    fn render_program(&self) -> PathBuf {
        let program = self.root.join("fakebar");
        fs::write(
            &program,
            format!(
                "#!/bin/sh\necho \"$@\" >> '{}'\ncat >> '{}'\n",
                self.args_log.display(),
                self.content_log.display()
            ),
        )
        .expect("write fake bar");
        let mut perms = fs::metadata(&program).expect("stat").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&program, perms).expect("chmod");
        program
    }

    fn config(&self, program: &Path) -> Config {
        let colors: Vec<String> = (0..16).map(|index| format!("\"#2020{index:02x}\"")).collect();
        let raw = format!(
            r##"
[render]
program = "{program}"
fonts = ["Hack"]
grace_ms = 0
stack_lead_ms = 0
retire_timeout_ms = 2000

[render.regions.right]
battery = "BAT"
clock = "${{foreground}}"

[theme]
dir = "{walls}"
image = "beach.png"

[theme.palette]
foreground = "#ffffff"
background = "#000000"
colors = [{colors}]

[stacking]
enabled = false

[transport]
bind = "127.0.0.1:0"

[[periodic]]
interval_secs = 60
command = ["sh", "-c", "echo tick >> \"$0\"", "{tick}"]
"##,
            program = program.display(),
            walls = self.root.join("walls").display(),
            colors = colors.join(", "),
            tick = self.tick_log.display(),
        );
        let config: Config = toml::from_str(&raw).expect("config");
        config.validate().expect("valid config");
        config
    }
}

#[test]
fn supervisor_serves_remote_commands_end_to_end() {
    let fixture = Fixture::new("end-to-end");
    let config = fixture.config(&fixture.render_program());

    let app = App::start(&config).expect("start");
    let addr = app.local_addr().to_string();
    let control = app.control();
    let running = std::thread::spawn(move || app.run());

    let ask = |request: Request| send_request(&addr, &request).expect("reply");

    assert_eq!(ask(Request::new("set_font_size").with_val("15")), json!({}));
    assert_eq!(ask(Request::new("get_font_size")), json!("15"));
    assert_eq!(ask(Request::new("get_opt").with_key("-B")), json!("#000000"));
    assert_eq!(
        ask(Request::new("update_mod").with_key("battery").with_val("B42")),
        json!({})
    );
    assert_eq!(
        ask(Request::new("frobnicate")),
        json!({ "error": "Unknown command: frobnicate" })
    );
    assert_eq!(ask(Request::new("get_colors"))["color3"], json!("#FF202003"));

    control.send(Control::Shutdown).expect("send shutdown");
    running.join().expect("join").expect("clean shutdown");

    let args = fs::read_to_string(&fixture.args_log).expect("args log");
    let generations: Vec<&str> = args.lines().collect();
    assert_eq!(generations.len(), 2, "one replace at startup, one for set_font_size");
    assert!(generations[0].ends_with("-b -f Hack:size=13"));
    assert!(generations[1].ends_with("-b -f Hack:size=15"));

    let content = fs::read_to_string(&fixture.content_log).expect("content log");
    let lines: Vec<&str> = content.lines().collect();
    let initial = "%{l}%{c}%{r}BAT#FFffffff";
    assert_eq!(lines.iter().filter(|line| **line == initial).count(), 2);
    assert_eq!(lines.last(), Some(&"%{l}%{c}%{r}B42#FFffffff"));

    wait_for_file(&fixture.tick_log);
    assert!(fs::read_to_string(&fixture.tick_log)
        .expect("tick log")
        .starts_with("tick"));
}

#[test]
fn startup_fails_when_the_render_program_cannot_spawn() {
    let fixture = Fixture::new("startup-failure");
    let config = fixture.config(Path::new("/nonexistent/barkeep-fakebar"));

    let err = App::start(&config).err().expect("startup should fail");
    assert!(matches!(err, AppError::Startup(_)), "unexpected error: {err}");
}

#[test]
fn shutdown_message_stops_an_idle_supervisor() {
    let fixture = Fixture::new("idle");
    let config = fixture.config(&fixture.render_program());

    let app = App::start(&config).expect("start");
    let control = app.control();
    let running = std::thread::spawn(move || app.run());

    let started = Instant::now();
    control.send(Control::Shutdown).expect("send shutdown");
    running.join().expect("join").expect("clean shutdown");
    assert!(started.elapsed() < Duration::from_secs(5));
}

fn wait_for_file(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline && !path.exists() {
        std::thread::sleep(Duration::from_millis(40));
    }
}

fn temp_workspace(name: &str) -> PathBuf {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time")
        .as_nanos();
    let root = std::env::temp_dir().join(format!("barkeep-app-{name}-{ts}"));
    fs::create_dir_all(&root).expect("mkdir workspace");
    root
}
