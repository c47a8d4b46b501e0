use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = parley_api::Args::parse();

	parley_api::run(args).await
}
