use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "meetcap")]
#[command(about = "Meeting-capture recording and A/V sync core", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Run the capture service (default)
    Run,
    /// Print version information
    Version,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults_to_service() {
        let cli = Cli::parse_from(["meetcap"]);
        assert!(!cli.verbose);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_parse_verbose_run() {
        let cli = Cli::parse_from(["meetcap", "--verbose", "run"]);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Some(CliCommand::Run)));
    }
}
