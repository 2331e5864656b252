//! Interactive prompts for a report run.
//!
//! Asks for the AOI, catalog and output location with `dialoguer`,
//! defaulting to the `OVERLAY_*` environment variables, so a run can be
//! started without memorizing CLI flags.

use std::path::PathBuf;

use dialoguer::{Confirm, Input, Select};
use overlay_report_cli_utils::MultiProgress;
use overlay_report_geometry::Crs;
use overlay_report_overlay::RunConfig;

/// Top-level actions.
enum Action {
    Run,
    CheckCatalog,
}

impl Action {
    const ALL: &[Self] = &[Self::Run, Self::CheckCatalog];

    #[must_use]
    const fn label(&self) -> &'static str {
        match self {
            Self::Run => "Generate an overlay report",
            Self::CheckCatalog => "Check a catalog",
        }
    }
}

/// Runs the interactive menu.
///
/// # Errors
///
/// Returns an error if a prompt fails or the chosen action fails.
pub async fn run(multi: &MultiProgress) -> Result<(), Box<dyn std::error::Error>> {
    println!("Overlay Report");
    println!();

    let labels: Vec<&str> = Action::ALL.iter().map(Action::label).collect();
    let idx = Select::new()
        .with_prompt("What would you like to do?")
        .items(&labels)
        .default(0)
        .interact()?;

    let catalog = prompt_path(
        "Catalog (TOML, CSV, or directory of CSV tabs)",
        optional_env("OVERLAY_CATALOG"),
    )?;

    match Action::ALL[idx] {
        Action::CheckCatalog => crate::check_catalog(&catalog)?,
        Action::Run => {
            let aoi = prompt_path("AOI polygon file", None)?;
            let output = prompt_path(
                "Report file or directory",
                Some(optional_env("OVERLAY_OUTPUT_DIR").unwrap_or_else(|| ".".to_string())),
            )?;

            let mut config = RunConfig::new(aoi, catalog, output);
            config.protected_path = optional_env("OVERLAY_PROTECTED").map(PathBuf::from);
            config.database_url = optional_env("OVERLAY_DATABASE_URL");

            if Confirm::new()
                .with_prompt("Change advanced settings (CRS, concurrency)?")
                .default(false)
                .interact()?
            {
                let epsg: u32 = Input::new()
                    .with_prompt("Working CRS EPSG code")
                    .default(Crs::BC_ALBERS.epsg())
                    .interact_text()?;
                config.working_crs = Crs::from_epsg(epsg);

                config.concurrency = Input::new()
                    .with_prompt("Datasets evaluated at once")
                    .default(1_usize)
                    .interact_text()?;
            }

            crate::execute(multi, &config).await?;
        }
    }

    Ok(())
}

fn prompt_path(prompt: &str, default: Option<String>) -> Result<PathBuf, dialoguer::Error> {
    let mut input = Input::<String>::new().with_prompt(prompt);
    if let Some(default) = default {
        input = input.default(default);
    }
    let text = input.interact_text()?;
    Ok(PathBuf::from(text.trim()))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
