use anyhow::{Context as AnyhowContext, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;
use topology::{ExecutionMode, Projection};

use super::{Session, fingerprint};
use crate::Context;
use crate::ui;

/// The publish manifest handed to deployment tooling
#[derive(Debug, Serialize)]
pub struct Manifest<'a> {
    pub fingerprint: String,
    pub domain: &'a str,
    #[serde(flatten)]
    pub projection: &'a Projection,
}

pub fn run(ctx: &Context, output: Option<&Path>) -> Result<()> {
    let session = Session::open(ctx)?;
    if !ctx.mode.is_publish() {
        log::info!("publish always resolves in publish mode");
    }
    let (_, projection) = session.project(ExecutionMode::Publish)?;
    let json = render(&session, &projection)?;

    match output {
        Some(path) => {
            fs::write(path, format!("{json}\n"))
                .with_context(|| format!("Could not write manifest to {}", path.display()))?;
            if !ctx.quiet {
                ui::success(&format!(
                    "Wrote manifest for {} resources to {}",
                    projection.nodes.len(),
                    path.display()
                ));
            }
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn render(session: &Session, projection: &Projection) -> Result<String> {
    let manifest = Manifest {
        fingerprint: fingerprint(projection)?,
        domain: &session.config.publish.domain,
        projection,
    };
    serde_json::to_string_pretty(&manifest).context("Failed to serialize manifest")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CONFIG_FILE;
    use tempfile::TempDir;

    #[test]
    fn test_writes_publish_manifest() {
        let dir = TempDir::new().unwrap();
        let declaration = dir.path().join(CONFIG_FILE);
        fs::write(&declaration, include_str!("../../demos/pets.toml")).unwrap();
        let output = dir.path().join("manifest.json");

        let ctx = Context {
            verbose: 0,
            quiet: true,
            file: declaration.to_str().map(str::to_string),
            params: vec![
                ("FoundryProjectUrl".into(), "https://foundry.example".into()),
                ("FoundryAgentId".into(), "asst_1".into()),
            ],
            mode: ExecutionMode::Run,
        };
        run(&ctx, Some(&output)).unwrap();

        let manifest: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(manifest["mode"], "publish");
        assert_eq!(manifest["domain"], "internal");
        assert_eq!(manifest["fingerprint"].as_str().unwrap().len(), 64);
        assert_eq!(
            manifest["nodes"]["frontend"]["publish"]["build_args"]["REACT_APP_USE_MOCK_DATA"],
            "false"
        );
        assert_eq!(
            manifest["nodes"]["frontend"]["publish"]["packaging"]["type"],
            "build-file"
        );
        assert_eq!(
            manifest["nodes"]["chat"]["env"]["FRONTEND_URL"],
            "https://frontend.internal"
        );
        assert_eq!(manifest["order"].as_array().unwrap().len(), 6);
    }
}
