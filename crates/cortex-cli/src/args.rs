//! Command-line arguments.
//!
//! ```text
//! cortex <config> [--hot-reload <seconds>] [--console] [--no-memory]
//! ```
//!
//! `<config>` is either a path to a `.json` / `.toml` file or a name looked
//! up in the configuration directory (`$CORTEX_CONFIG_DIR`, default
//! `./config`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use cortex_config::loader::resolve_in;
use cortex_config::config_dir;
use cortex_types::ConfigError;

pub const USAGE: &str = "usage: cortex <config> [--hot-reload <seconds>] [--console] [--no-memory]";

#[derive(Debug, Clone, PartialEq)]
pub struct Args {
    pub config: String,
    pub hot_reload: Option<Duration>,
    pub console: bool,
    pub mode_memory: bool,
}

impl Args {
    pub fn parse(mut argv: impl Iterator<Item = String>) -> Result<Self, String> {
        let mut config = None;
        let mut hot_reload = None;
        let mut console = false;
        let mut mode_memory = true;

        while let Some(arg) = argv.next() {
            match arg.as_str() {
                "--hot-reload" => {
                    let raw = argv
                        .next()
                        .ok_or_else(|| "--hot-reload needs a number of seconds".to_string())?;
                    let secs: f64 = raw
                        .parse()
                        .map_err(|_| format!("invalid --hot-reload interval '{raw}'"))?;
                    if !secs.is_finite() || secs <= 0.0 {
                        return Err(format!("--hot-reload interval must be positive, got {raw}"));
                    }
                    hot_reload = Some(Duration::from_secs_f64(secs));
                }
                "--console" => console = true,
                "--no-memory" => mode_memory = false,
                "-h" | "--help" => return Err(USAGE.to_string()),
                flag if flag.starts_with("--") => return Err(format!("unknown option '{flag}'")),
                _ if config.is_some() => return Err(format!("unexpected argument '{arg}'")),
                _ => config = Some(arg),
            }
        }

        Ok(Self {
            config: config.ok_or_else(|| USAGE.to_string())?,
            hot_reload,
            console,
            mode_memory,
        })
    }

    /// The configuration file the run uses.
    pub fn config_path(&self) -> Result<PathBuf, ConfigError> {
        let as_path = Path::new(&self.config);
        if as_path.is_file() {
            return Ok(as_path.to_path_buf());
        }
        resolve_in(&config_dir(), &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, String> {
        Args::parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn config_name_alone() {
        let args = parse(&["guard"]).unwrap();
        assert_eq!(args.config, "guard");
        assert_eq!(args.hot_reload, None);
        assert!(!args.console);
        assert!(args.mode_memory);
    }

    #[test]
    fn all_options() {
        let args = parse(&["--console", "guard", "--hot-reload", "0.5", "--no-memory"]).unwrap();
        assert_eq!(args.hot_reload, Some(Duration::from_millis(500)));
        assert!(args.console);
        assert!(!args.mode_memory);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["guard", "other"]).is_err());
        assert!(parse(&["guard", "--hot-reload"]).is_err());
        assert!(parse(&["guard", "--hot-reload", "-1"]).is_err());
        assert!(parse(&["guard", "--verbose"]).is_err());
    }

    #[test]
    fn existing_file_wins_over_name_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("guard.json");
        std::fs::write(&file, "{}").unwrap();
        let args = parse(&[file.to_str().unwrap()]).unwrap();
        assert_eq!(args.config_path().unwrap(), file);
    }
}
