//! The POS control process.

mod cli;
mod config;
mod run;

fn main() -> anyhow::Result<()> {
    let args: cli::Args = argh::from_env();
    logger::init(args.log.as_deref());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("building the tokio runtime");
    runtime.block_on(run::run(args))
}
