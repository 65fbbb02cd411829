use barkeep::ui::{MessageBlock, OutputMode, PlainRenderer, Renderer};
use barkeep::{load_config, parse_command, print_usage, render_check_report, Command};

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let output_mode = OutputMode::from_env();
    let cmd = match parse_command(args) {
        Ok(cmd) => cmd,
        Err(err) => {
            let mut renderer = PlainRenderer::stderr(output_mode);
            let _ = renderer.error_block(
                &MessageBlock::new("Invalid command arguments", err.to_string())
                    .with_hint("Run `barkeep --help` to see supported command forms"),
            );
            print_usage();
            std::process::exit(2);
        }
    };

    let failure = match cmd {
        Command::Help => {
            print_usage();
            None
        }
        Command::Run(args) => {
            barkeep::logging::init();
            match load_config(args.config.as_deref()) {
                Ok((path, config)) => {
                    tracing::info!(config = %path.display(), "starting supervisor");
                    barkeep::app::run(&config)
                        .err()
                        .map(|err| MessageBlock::new("Supervisor failed", err.to_string()))
                }
                Err(err) => Some(
                    MessageBlock::new("Invalid configuration", err.to_string())
                        .with_hint("Run `barkeep check` to inspect the config"),
                ),
            }
        }
        Command::Check(args) => {
            let loaded = load_config(args.config.as_deref()).and_then(|(path, config)| {
                let target = config.render_target()?;
                Ok((path, config, target))
            });
            match loaded {
                Ok((path, config, target)) => {
                    let mut renderer = PlainRenderer::stdout(output_mode);
                    render_check_report(&mut renderer, &path, &config, &target)
                        .err()
                        .map(|err| MessageBlock::new("Output failed", err.to_string()))
                }
                Err(err) => Some(MessageBlock::new("Invalid configuration", err.to_string())),
            }
        }
        Command::Send(args) => match barkeep::transport::send_request(&args.addr, &args.request) {
            Ok(reply) => {
                println!("{reply}");
                None
            }
            Err(err) => Some(
                MessageBlock::new("Request failed", err.to_string())
                    .with_hint("Is `barkeep run` listening on that address?"),
            ),
        },
    };

    if let Some(block) = failure {
        let mut renderer = PlainRenderer::stderr(output_mode);
        let _ = renderer.error_block(&block);
        std::process::exit(1);
    }
}
