use std::process::ExitCode;

use clap::Parser;
use log::{error, warn};

use modresolve::{
    cli::args::{CliArgs, Command},
    resolve::ResolveOptions,
    resolver::FailureKind,
    ModResolve,
};

fn main() -> ExitCode {
    let cli_args = CliArgs::parse();
    let default_filter = if cli_args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match run(cli_args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli_args: CliArgs) -> anyhow::Result<()> {
    let mut builder = ModResolve::builder();
    if let Some(repository_directory) = cli_args.repository_directory {
        builder = builder.repository_dir(repository_directory);
    }

    match cli_args.cmd {
        Command::Resolve {
            configurations,
            conflict,
            workers,
            retries,
            report,
            intransitive,
            fail_fast,
        } => {
            if let Some(conflict) = conflict {
                builder = builder.conflict(conflict);
            }
            if let Some(workers) = workers {
                builder = builder.workers(workers);
            }
            if let Some(retries) = retries {
                builder = builder.retries(retries);
            }
            let modresolve = builder.try_build()?;

            let mut options = ResolveOptions::default()
                .with_configurations(configurations)
                .with_transitive(!intransitive);
            if fail_fast {
                options = options.with_fatal_failure(FailureKind::NotFound);
            }
            let cancellation = options.cancellation.clone();

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            let resolve_report = runtime.block_on(async {
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("Interrupted, waiting for running lookups to finish");
                        cancellation.cancel();
                    }
                });
                modresolve
                    .resolve_file(&cli_args.module_location, &options, report.as_deref())
                    .await
            })?;
            if report.is_none() {
                print!("{}", resolve_report.to_toml_string()?);
            }
            resolve_report.outcome()?;
            Ok(())
        }
        Command::Check => {
            builder.try_build()?.check(&cli_args.module_location)?;
            Ok(())
        }
    }
}
