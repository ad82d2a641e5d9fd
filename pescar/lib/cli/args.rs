use std::path::PathBuf;

use clap::Parser;

use super::styles;
use crate::{models::PullingStrategy, reference::Reference};

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// `pescar` keeps annotated Kubernetes deployments on the newest image their registry publishes
#[derive(Debug, Parser)]
#[command(name = "pescar", author, about, version, styles=styles::styles())]
pub struct PescarArgs {
    /// The subcommand to run
    #[command(subcommand)]
    pub subcommand: Option<PescarSubcommand>,

    /// Path to the configuration file
    #[arg(short, long, env = "PESCAR_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short = 'V', long, global = true)]
    pub verbose: bool,
}

/// Available subcommands
#[derive(Debug, Parser)]
pub enum PescarSubcommand {
    /// Watch the cluster, poll registries and serve the admin API
    #[command(name = "serve")]
    Serve {
        /// Port of the admin API, overrides `server.port`
        #[arg(short, long, env = "PESCAR_PORT")]
        port: Option<u16>,
    },

    /// Resolve the newest image of the repository an image reference points to
    #[command(name = "resolve")]
    Resolve {
        /// The image reference, e.g. `nginx` or `ghcr.io/acme/api:1.4`
        #[arg(name = "IMAGE")]
        image: Reference,

        /// How to pick the newest tag
        #[arg(short, long, default_value_t = PullingStrategy::default())]
        strategy: PullingStrategy,
    },
}

//-------------------------------------------------------------------------------------------------
// Tests
//-------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_args_are_well_formed() {
        PescarArgs::command().debug_assert();
    }

    #[test]
    fn test_parse_serve() -> anyhow::Result<()> {
        let args = PescarArgs::try_parse_from([
            "pescar",
            "--config",
            "/etc/pescar.toml",
            "serve",
            "--port",
            "9090",
            "-V",
        ])?;

        assert!(args.verbose);
        assert_eq!(args.config, Some(PathBuf::from("/etc/pescar.toml")));
        assert!(matches!(
            args.subcommand,
            Some(PescarSubcommand::Serve { port: Some(9090) })
        ));
        Ok(())
    }

    #[test]
    fn test_parse_resolve() -> anyhow::Result<()> {
        let args = PescarArgs::try_parse_from([
            "pescar",
            "resolve",
            "ghcr.io/acme/api:1.4",
            "--strategy",
            "lexicographic",
        ])?;

        let Some(PescarSubcommand::Resolve { image, strategy }) = args.subcommand else {
            anyhow::bail!("expected the resolve subcommand");
        };
        assert_eq!(image.get_registry(), "ghcr.io");
        assert_eq!(image.get_repository(), "acme/api");
        assert_eq!(strategy, PullingStrategy::Lexicographic);
        Ok(())
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(PescarArgs::try_parse_from(["pescar", "resolve", "Upper/Case:tag"]).is_err());
        assert!(
            PescarArgs::try_parse_from(["pescar", "resolve", "nginx", "--strategy", "newest"])
                .is_err()
        );
    }
}
