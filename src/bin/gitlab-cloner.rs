use anyhow::{Context, Result};
use clap::Parser;
use gitlab_tools::{
    cli::{CloneArgs, init_logging},
    cloner,
    config::FileConfig,
    gitlab::GitLabClient,
    progress,
    vcs::GitCli,
};

fn main() {
    match inner_main() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(error = ?e);
            std::process::exit(1);
        }
    }
}

fn inner_main() -> Result<i32> {
    let args = CloneArgs::parse();
    init_logging(args.common.verbose, args.common.quiet)?;

    let file = FileConfig::load().context("loading config file")?;
    let quiet = args.common.quiet;
    let config = args.into_config(&file).context("invalid configuration")?;

    let api = GitLabClient::new(config.gitlab.clone());
    let progress = progress::for_mode(quiet);
    let report = cloner::run(&config, &api, &GitCli, progress.as_ref())
        .inspect_err(|_| progress.finish())
        .context("clone aborted")?;

    report.print_summary("Clone Summary");
    if let Some(path) = &config.json_report {
        report.write_json(path).context("writing JSON report")?;
    }
    Ok(report.exit_code())
}
