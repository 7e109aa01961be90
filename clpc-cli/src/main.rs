use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

use clpc::linkscript::BuildPlatform;
use clpc::pipeline::{self, ToolchainPaths};
use clpc::project::Project;
use log::{error, info};

fn toolchain_paths() -> ToolchainPaths {
    let from_env_or = |var: &str, default: &str| {
        std::env::var_os(var)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(default))
    };

    ToolchainPaths {
        gbuild: from_env_or("CLPC_GBUILD", "gbuild"),
        elxr: from_env_or("CLPC_ELXR", "elxr"),
        wiiurpxtool: from_env_or("CLPC_WIIURPXTOOL", "wiiurpxtool"),
    }
}

fn main() -> ExitCode {
    env_logger::init();

    print!("Enter project.yaml path: ");
    let _ = std::io::stdout().flush();

    let mut file_path = String::new();
    if std::io::stdin().read_line(&mut file_path).is_err() {
        error!("failed to read project path from stdin");
        return ExitCode::FAILURE;
    }
    let file_path = file_path.trim();
    if file_path.is_empty() {
        return ExitCode::SUCCESS;
    }

    let project = match Project::from_yaml(std::path::Path::new(file_path)) {
        Ok(project) => project,
        Err(err) => {
            error!("failed to load project: {err}");
            return ExitCode::FAILURE;
        }
    };

    let toolchain = toolchain_paths();

    for target_name in project.targets.keys() {
        for platform in [BuildPlatform::Emulator, BuildPlatform::CafeLoader] {
            info!("*** Building {target_name:?} from {:?} ***", project.name);

            if let Err(err) = pipeline::build_target(&project, target_name, platform, &toolchain) {
                error!("build failed for {target_name:?}: {err}");
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}
