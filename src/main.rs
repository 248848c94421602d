use clap::Parser;

use pipefetch::{
    cli::{
        args::{CliArgs, Command},
        command_handlers::{
            do_clone, do_diff, do_info, do_list, do_path, do_pull, do_revisions, do_update,
            do_view,
        },
    },
    AssetManager,
};

fn run() -> anyhow::Result<()> {
    let cli_args: CliArgs = CliArgs::parse();

    let mut builder =
        AssetManager::builder().credentials(cli_args.user.clone(), cli_args.password.clone());
    if let Some(cache_dir) = &cli_args.cache_dir {
        builder = builder.cache_directory(cache_dir);
    }
    if let Some(providers_file) = &cli_args.providers_file {
        builder = builder.providers_file(providers_file);
    }
    if let Some(hub) = &cli_args.hub {
        builder = builder.hub(hub);
    }
    let mut manager = builder.try_build()?;

    match cli_args.cmd {
        Command::List => do_list(&manager),
        Command::Revisions { project } => do_revisions(&mut manager, &project),
        Command::Pull {
            project,
            revision,
            depth,
        } => do_pull(&mut manager, &project, revision.as_deref(), depth),
        Command::Clone {
            project,
            destination,
            revision,
            depth,
        } => do_clone(
            &mut manager,
            &project,
            destination.as_deref(),
            revision.as_deref(),
            depth,
        ),
        Command::Info { project } => do_info(&mut manager, &project),
        Command::Update { project } => do_update(&mut manager, &project),
        Command::Diff { project, verbose } => do_diff(&mut manager, &project, verbose),
        Command::View { project, revision } => {
            do_view(&mut manager, &project, revision.as_deref())
        }
        Command::Path { project, revision } => {
            do_path(&mut manager, &project, revision.as_deref())
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}
