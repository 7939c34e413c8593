use clap::{ArgAction, Parser, ValueEnum};
use directories::BaseDirs;
use std::{ffi::OsString, path::PathBuf};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(
        short,
        long,
        env = "DATABASE_PATH",
        value_name = "FILE",
        help = "Path to the SQLite database file (created if it does not exist)",
        default_value = get_default_database_file()
    )]
    pub database: PathBuf,
    #[arg(short, long, value_name = "BOT TOKEN", env = "TELEGRAM_BOT_TOKEN")]
    pub token: String,
    #[arg(
        short,
        long,
        action = ArgAction::Count,
        help = "Log more: -v for info, -vv for debug (overrides LOG_LEVEL)"
    )]
    pub verbose: u8,
    #[arg(long, value_enum, env = "LOG_FORMAT", default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

pub fn parse_args() -> Cli {
    Cli::parse()
}

fn get_default_database_file() -> OsString {
    let db_name = "mention_bot.sqlite";
    if cfg!(target_os = "android") {
        db_name.into()
    } else {
        match BaseDirs::new() {
            Some(base_dirs) => base_dirs.data_dir().join(db_name).into(),
            None => db_name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_is_counted() {
        let cli = Cli::try_parse_from(["bot", "-t", "123:abc", "-vv", "-d", "x.sqlite"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.database, PathBuf::from("x.sqlite"));
        assert_eq!(cli.log_format, LogFormat::Pretty);
    }

    #[test]
    fn json_log_format() {
        let cli =
            Cli::try_parse_from(["bot", "--token", "t", "--log-format", "json"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.verbose, 0);
    }
}
