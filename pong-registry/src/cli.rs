use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pong-registry", version)]
#[command(about = "Liveness registry: pongers report heartbeats, pingers list active targets")]
pub struct Cli {
    /// Fichier de configuration YAML (optionnel)
    #[arg(long, env = "PONG_REGISTRY_CONFIG", default_value = "registry.yaml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Lance le serveur HTTP et le sweeper (par défaut)
    Serve,
    /// Crée le schéma de stockage puis quitte
    InitDb,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Serve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_is_default_command() {
        let cli = Cli::try_parse_from(["pong-registry"]).unwrap();
        assert_eq!(cli.command(), Command::Serve);
    }

    #[test]
    fn test_init_db_with_config_path() {
        let cli = Cli::try_parse_from(["pong-registry", "--config", "/etc/pong.yaml", "init-db"]).unwrap();
        assert_eq!(cli.command(), Command::InitDb);
        assert_eq!(cli.config, PathBuf::from("/etc/pong.yaml"));
    }
}
