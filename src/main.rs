use clap::Parser;
use javelin::{Vm, VmConfig};
use log::{debug, LevelFilter};
use simplelog::*;
use std::fs::File;
use std::path::PathBuf;
use std::process;

#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    #[arg(
        short = 'c',
        long = "classpath",
        visible_alias = "cp",
        value_delimiter = ':',
        help = "Directories holding compiled classes; use ':' as separator"
    )]
    pub class_path: Vec<PathBuf>,
    #[arg(long = "log-file", default_value = "javelin.log")]
    pub log_file: PathBuf,
    #[arg(
        long = "log-level",
        default_value = "info",
        value_parser = parse_level,
        help = "off, error, warn, info, debug or trace"
    )]
    pub log_level: LevelFilter,
    #[arg(long = "max-stack-depth", default_value_t = 1024)]
    pub max_stack_depth: usize,
    #[arg(help = "Main class, e.g. com.example.Main or com/example/Main")]
    pub main_class: String,
    #[arg(trailing_var_arg = true, help = "Arguments passed to main")]
    pub args: Vec<String>,
}

fn parse_level(level: &str) -> Result<LevelFilter, String> {
    level
        .parse()
        .map_err(|_| format!("unknown log level `{}`", level))
}

fn main() {
    let args = Args::parse();
    match File::create(&args.log_file) {
        Ok(file) => {
            let _ = WriteLogger::init(
                args.log_level,
                ConfigBuilder::new()
                    .set_time_level(LevelFilter::Off)
                    .set_thread_level(LevelFilter::Off)
                    .set_target_level(LevelFilter::Off)
                    .build(),
                file,
            );
        }
        Err(err) => eprintln!("Cannot create {}: {}", args.log_file.display(), err),
    }
    debug!("Provided command line arguments: {:?}", args);

    let mut config = VmConfig {
        main_class: args.main_class,
        args: args.args,
        max_stack_depth: args.max_stack_depth,
        ..VmConfig::default()
    };
    if !args.class_path.is_empty() {
        config.class_path = args.class_path;
    }

    if let Err(err) = Vm::new(config).start() {
        eprintln!("Error: {}", err);
        process::exit(1);
    }
}
