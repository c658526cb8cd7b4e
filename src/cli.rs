use clap::Parser;
use std::path::PathBuf;

/// Record a triggered camera into size-rotated AVI files
///
/// Segments are written as <PREFIX>-0000.avi, <PREFIX>-0001.avi, ... until
/// Ctrl-C, a TERM line on stdin, or a KILL file in the working directory.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "session-recorder")]
#[command(version)]
pub struct Cli {
    /// Output path prefix; segments become <PREFIX>-NNNN.avi
    #[arg(value_parser = non_empty_path)]
    pub prefix: PathBuf,

    /// JSON configuration file
    #[arg(long, env = "SESSION_RECORDER_CONFIG")]
    pub config: Option<PathBuf>,
}

fn non_empty_path(value: &str) -> Result<PathBuf, String> {
    if value.is_empty() {
        return Err("output prefix is empty".to_string());
    }
    Ok(PathBuf::from(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;
    use clap::CommandFactory;

    fn parse(list: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("session-recorder").chain(list.iter().copied()))
    }

    #[test]
    fn test_command_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_prefix_only() {
        assert_eq!(
            parse(&["/data/mouse1"]).unwrap(),
            Cli {
                prefix: PathBuf::from("/data/mouse1"),
                config: None
            }
        );
    }

    #[test]
    fn test_config_forms() {
        for list in [
            &["--config", "rec.json", "out"][..],
            &["out", "--config=rec.json"][..],
        ] {
            let parsed = parse(list).unwrap();
            assert_eq!(parsed.config, Some(PathBuf::from("rec.json")));
            assert_eq!(parsed.prefix, PathBuf::from("out"));
        }
    }

    #[test]
    fn test_usage_errors() {
        let kind = |list: &[&str]| parse(list).unwrap_err().kind();
        assert_eq!(kind(&[]), ErrorKind::MissingRequiredArgument);
        assert!(parse(&["a", "b"]).unwrap_err().use_stderr());
        assert!(parse(&["--config"]).unwrap_err().use_stderr());
        assert_eq!(kind(&["--verbose", "out"]), ErrorKind::UnknownArgument);
        assert_eq!(kind(&[""]), ErrorKind::ValueValidation);
        assert_eq!(kind(&["--help"]), ErrorKind::DisplayHelp);
    }
}
