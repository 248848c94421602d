use std::path::Path;

use log::info;

use crate::{api::ProjectInfo, AssetManager};

/// Handler to list command
pub fn do_list(manager: &AssetManager) -> anyhow::Result<()> {
    let projects = manager.list()?;
    if projects.is_empty() {
        info!("No projects found in {}", manager.cache().location().display());
    }
    for project in projects {
        println!("{project}");
    }
    Ok(())
}

/// Handler to revisions command
pub fn do_revisions(manager: &mut AssetManager, project: &str) -> anyhow::Result<()> {
    for revision in manager.list_revisions(project)? {
        println!("{revision}");
    }
    Ok(())
}

/// Handler to pull command
pub fn do_pull(
    manager: &mut AssetManager,
    project: &str,
    revision: Option<&str>,
    depth: Option<u32>,
) -> anyhow::Result<()> {
    let status = manager.download(project, revision, depth)?;
    info!("{}: {}", project, status);
    Ok(())
}

/// Handler to clone command
pub fn do_clone(
    manager: &mut AssetManager,
    project: &str,
    destination: Option<&Path>,
    revision: Option<&str>,
    depth: Option<u32>,
) -> anyhow::Result<()> {
    let destination = manager.clone(project, destination, revision, depth)?;
    info!("{} cloned to {}", project, destination.display());
    Ok(())
}

/// Handler to info command
pub fn do_info(manager: &mut AssetManager, project: &str) -> anyhow::Result<()> {
    let info = manager.info(project)?;
    for line in format_info(&info) {
        println!("{line}");
    }
    Ok(())
}

/// Handler to update command
pub fn do_update(manager: &mut AssetManager, project: &str) -> anyhow::Result<()> {
    let commit_id = manager.update(project)?;
    info!("{} is up to date at {}", project, commit_id);
    Ok(())
}

/// Handler to diff command
pub fn do_diff(manager: &mut AssetManager, project: &str, level: u8) -> anyhow::Result<()> {
    for line in manager.diff(project, level)? {
        println!("{line}");
    }
    Ok(())
}

/// Handler to view command
pub fn do_view(
    manager: &mut AssetManager,
    project: &str,
    revision: Option<&str>,
) -> anyhow::Result<()> {
    print!("{}", manager.view(project, revision)?);
    Ok(())
}

/// Handler to path command
pub fn do_path(
    manager: &mut AssetManager,
    project: &str,
    revision: Option<&str>,
) -> anyhow::Result<()> {
    let target = manager.run_path(project, revision)?;
    println!("{}", target.main_script.display());
    Ok(())
}

fn format_info(info: &ProjectInfo) -> Vec<String> {
    let mut lines = vec![
        format!(" project name: {}", info.project),
        format!(" repository  : {} ({})", info.repository_url, info.provider),
    ];
    if let Some(path) = &info.local_path {
        lines.push(format!(" local path  : {}", path.display()));
    }
    lines.push(format!(" main script : {}", info.main_script));
    if let Some(description) = &info.description {
        lines.push(format!(" description : {description}"));
    }
    if let Some(homepage) = &info.homepage {
        lines.push(format!(" homepage    : {homepage}"));
    }
    if !info.revisions.is_empty() {
        lines.push(" revisions   :".to_owned());
        for (revision, notice) in &info.revisions {
            let marker = if notice.is_some() { '*' } else { ' ' };
            lines.push(format!(" {marker} {revision}"));
        }
    }
    lines
}
