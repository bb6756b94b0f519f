//! `donotnet` binary entry point.
//!
//! Kept deliberately thin: argument parsing and every command's actual
//! behavior live in `donotnet_cli` (the library crate) so they stay
//! testable without a process boundary. This file only owns the
//! process-lifetime global state: the tracing subscriber, the resolved
//! repository root/config, and the final exit code, wiring it all
//! together once at the top level.

use std::process::ExitCode;

use donotnet_cli::{
    apply_color_mode, load_workspace, parse_args, resolve_config, resolve_repo_root, run_build_command, run_cache_command,
    run_completion_command, run_config_command, run_coverage_build_command, run_list_command, run_plan_command,
    run_test_command, run_version_command, run_watch_loop, Command,
};

fn main() -> ExitCode {
    let args = match parse_args(std::env::args()) {
        Ok(args) => args,
        Err(err) => {
            // clap's own error already prints usage/help to stderr (or help
            // text to stdout); its exit code encodes which.
            err.exit();
        }
    };

    let cwd = match &args.dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().unwrap_or_default(),
    };
    let repo_root = resolve_repo_root(&cwd);

    let config = match resolve_config(&args, &repo_root, &cwd) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    apply_color_mode(args.color.into());
    install_tracing(&args, &config);

    let workspace = match load_workspace(&repo_root) {
        Ok(workspace) => workspace,
        Err(err) => {
            eprintln!("error: failed to discover projects: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    let result = match &args.command {
        Command::Test(test_args) => {
            if args.watch {
                run_watch_loop(&args, &workspace, &config, true).map(|_| true)
            } else {
                run_test_command(&args, test_args, &workspace, &config)
            }
        }
        Command::Build(build_args) => {
            if args.watch {
                run_watch_loop(&args, &workspace, &config, false).map(|_| true)
            } else {
                run_build_command(&args, build_args, &workspace, &config)
            }
        }
        Command::List(list_args) => run_list_command(list_args, &workspace).map(|_| true),
        Command::Plan(plan_args) => run_plan_command(&args, plan_args, &workspace).map(|_| true),
        Command::Cache(cache_args) => run_cache_command(cache_args, &workspace, &config).map(|_| true),
        Command::Config(config_args) => run_config_command(config_args, &config).map(|_| true),
        Command::Coverage(coverage_args) => match &coverage_args.selector {
            donotnet_cli::CoverageSelector::Build => run_coverage_build_command(&workspace, &config).map(|_| true),
        },
        Command::Completion(completion_args) => {
            run_completion_command(completion_args);
            Ok(true)
        }
        Command::Version(version_args) => {
            run_version_command(version_args);
            Ok(true)
        }
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Install the process-global `tracing` subscriber once, seeded from
/// `--verbose`/`--quiet`/`RUST_LOG`. Library crates never do this
/// themselves; only the binary entry point owns this piece of global
/// mutable state.
fn install_tracing(args: &donotnet_cli::Args, config: &donotnet_core::Config) {
    use tracing_subscriber::EnvFilter;

    let default_level = if args.verbose {
        "debug"
    } else if args.quiet {
        "error"
    } else {
        config.log_level.as_str()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}
