use std::{net::SocketAddr, sync::Arc};

use clap::{CommandFactory, Parser};
use pescar::{
    cli::{AnsiStyles, PescarArgs, PescarSubcommand},
    cluster::KubeCluster,
    config::{AnzolConfig, PescarConfig},
    engine::{EngineSettings, Pescar},
    models::{Anzol, PullingStrategy},
    reference::Reference,
    registry::DockerRegistryClient,
    server::{self, ServerState},
    store::SqliteStore,
    PescarResult,
};

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> PescarResult<()> {
    let args = PescarArgs::parse();

    let config = PescarConfig::load(args.config.as_deref()).await?;
    config.validate()?;
    pescar::init_tracing(*config.get_logger().get_json(), args.verbose)?;

    match args.subcommand {
        Some(PescarSubcommand::Serve { port }) => {
            tracing::trace!("serving: port={port:?}");
            serve(config, port).await?;
        }
        Some(PescarSubcommand::Resolve { image, strategy }) => {
            tracing::trace!("resolving: image={image}, strategy={strategy}");
            resolve(&config, &image, strategy).await?;
        }
        None => {
            PescarArgs::command().print_help()?;
        }
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: *
//--------------------------------------------------------------------------------------------------

async fn serve(config: PescarConfig, port: Option<u16>) -> PescarResult<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(*config.get_server().get_port())));

    let store = Arc::new(SqliteStore::open(config.get_database().resolved_path()).await?);
    let cluster = Arc::new(KubeCluster::connect(config.get_kubernetes()).await?);
    let resolver = Arc::new(registry_client(&config));
    let pescar = Arc::new(Pescar::new(
        store,
        cluster,
        resolver,
        EngineSettings::from(&config),
    ));

    let anzols: Vec<Anzol> = config.get_anzols().iter().map(AnzolConfig::to_anzol).collect();
    pescar.register_anzols(&anzols).await?;

    let api = tokio::spawn(server::serve(
        ServerState::new(pescar.clone()),
        addr,
        pescar.subscribe_shutdown(),
    ));

    let signalled = pescar.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signalled.shutdown();
        }
    });

    let result = pescar.run().await;

    // Stops the API when the engine exits on its own.
    pescar.shutdown();
    api.await??;

    result
}

async fn resolve(
    config: &PescarConfig,
    image: &Reference,
    strategy: PullingStrategy,
) -> PescarResult<()> {
    let resolved = registry_client(config)
        .resolve_reference(image, strategy)
        .await?;

    println!("{}: {}", "tag".header(), resolved.tag.literal());
    println!("{}: {}", "digest".header(), resolved.digest.literal());
    if let Some(created) = resolved.created {
        println!("{}: {}", "created".header(), created.to_rfc3339());
    }
    println!(
        "{}: {}/{}@{}",
        "image".header(),
        image.get_registry(),
        image.get_repository(),
        resolved.digest
    );

    Ok(())
}

fn registry_client(config: &PescarConfig) -> DockerRegistryClient {
    DockerRegistryClient::new(
        *config.get_registry().get_max_retries(),
        *config.get_registry().get_tag_concurrency(),
    )
}
