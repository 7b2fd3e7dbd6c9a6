use clap::Parser;
use fixtures::marketplace::{router, MarketplaceState};
use fixtures::{run_server, FixtureArgs};

/// Mock marketplace API fixture server
#[derive(Parser, Debug)]
#[clap(name = "marketplace-fixture")]
struct Cli {
    #[clap(flatten)]
    common: FixtureArgs,

    /// The access token the server accepts at startup
    #[arg(long, default_value = "A1")]
    access: String,

    /// The refresh token the server accepts at startup
    #[arg(long, default_value = "R1")]
    refresh: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let state = MarketplaceState::new(&args.access, &args.refresh);
    let app = router(state);

    run_server(args.common, app).await
}
