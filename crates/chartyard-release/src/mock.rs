//! Deterministic stand-in for the package manager
//!
//! The chartyard binary runs [`mock_helm`] when started with the
//! `__mock-helm` sentinel, so executor and reconciler can be exercised end to
//! end without a cluster or a real package manager.
//!
//! Behavior:
//! - `install`/`upgrade` fail when the chart archive name contains `fail`
//! - `uninstall` of a release named `missing-*` reports the not-found message
//! - `get-manifest` and dry-run installs print a small two-object manifest

use crate::executor::RELEASE_NOT_FOUND;
use crate::process::ProcessOutput;

/// Run one fake package-manager invocation; `args` excludes the sentinel
pub fn mock_helm(args: &[String]) -> ProcessOutput {
    let Some((verb, rest)) = args.split_first() else {
        return ProcessOutput::failure(2, "Error: no command given");
    };

    let operands = positional(rest);
    let Some(release) = operands.first().copied() else {
        return ProcessOutput::failure(2, format!("Error: \"{}\" requires a release name", verb));
    };
    let namespace = flag(rest, "--namespace").unwrap_or("default");
    let dry_run = rest.iter().any(|a| a == "--dry-run");

    match verb.as_str() {
        "install" | "upgrade" => {
            let Some(chart) = operands.get(1) else {
                return ProcessOutput::failure(2, format!("Error: \"{}\" requires a chart", verb));
            };
            let archive = std::path::Path::new(chart)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if archive.contains("fail") {
                let phase = if verb == "install" { "INSTALLATION" } else { "UPGRADE" };
                return ProcessOutput::failure(
                    1,
                    format!("Error: {} FAILED: chart {} failed to render", phase, archive),
                );
            }
            if dry_run {
                return ProcessOutput::success(manifest(release, namespace));
            }
            let done = if verb == "install" { "installed" } else { "upgraded" };
            ProcessOutput::success(format!(
                "Release \"{}\" has been {} in namespace {}.",
                release, done, namespace
            ))
        }
        "uninstall" => {
            if release.starts_with("missing-") {
                ProcessOutput::failure(1, RELEASE_NOT_FOUND)
            } else {
                ProcessOutput::success(format!("release \"{}\" uninstalled", release))
            }
        }
        "status" => ProcessOutput::success(format!(
            "NAME: {}\nNAMESPACE: {}\nSTATUS: deployed",
            release, namespace
        )),
        "get-manifest" => ProcessOutput::success(manifest(release, namespace)),
        other => ProcessOutput::failure(2, format!("Error: unknown command \"{}\"", other)),
    }
}

/// Arguments that are neither flags nor flag values
fn positional(args: &[String]) -> Vec<&str> {
    let mut out = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--namespace" | "--values" | "--kubeconfig" => {
                iter.next();
            }
            a if a.starts_with("--") => {}
            a => out.push(a),
        }
    }
    out
}

fn flag<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn manifest(release: &str, namespace: &str) -> String {
    format!(
        "---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {release}-config\n  namespace: {namespace}\ndata:\n  release: {release}\n---\napiVersion: v1\nkind: Service\nmetadata:\n  name: {release}\n  namespace: {namespace}\nspec:\n  ports:\n    - port: 80\n"
    )
}
