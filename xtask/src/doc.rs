//! xtask doc: API documentation for the library crates.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use colored::Colorize;

/// Library crates and the features their docs are built with.
const DOCUMENTED: &[(&str, &[&str])] = &[
    ("platform", &["std"]),
    ("diagnostics", &["std"]),
    ("firmware", &[]),
];

/// `target/doc/<crate>/index.html`, with `-` mapped the way rustdoc does.
fn index_page(target_dir: &Path, krate: &str) -> PathBuf {
    target_dir
        .join("doc")
        .join(krate.replace('-', "_"))
        .join("index.html")
}

pub fn run(open: bool) -> Result<()> {
    println!();
    println!("{}", "📚 Building documentation...".cyan().bold());
    println!();

    let start = Instant::now();
    let target_dir = PathBuf::from(std::env::var("CARGO_TARGET_DIR").unwrap_or_else(|_| "target".into()));

    for &(krate, features) in DOCUMENTED {
        let mut cmd = Command::new("cargo");
        cmd.args(["doc", "--no-deps", "-p", krate]);
        if !features.is_empty() {
            cmd.arg("--features").arg(features.join(","));
        }
        // Broken intra-doc links fail the build.
        cmd.env("RUSTDOCFLAGS", "-D warnings");

        let output = cmd
            .output()
            .with_context(|| format!("Failed to run cargo doc for {krate}"))?;
        if !output.status.success() {
            eprintln!("{}", format!("  ✗ {krate} docs failed").red().bold());
            eprintln!();
            eprintln!("{}", String::from_utf8_lossy(&output.stderr));
            bail!("Documentation build failed for {krate}");
        }

        let page = index_page(&target_dir, krate);
        if !page.exists() {
            bail!("{} was not generated", page.display());
        }
        println!("{}", format!("  ✓ {krate}: {}", page.display()).green());
    }

    println!();
    println!(
        "{}",
        format!("✓ Documentation built in {:.2}s", start.elapsed().as_secs_f64()).green()
    );

    if open {
        let page = index_page(&target_dir, "diagnostics");
        let status = Command::new("cargo")
            .args(["doc", "--no-deps", "-p", "diagnostics", "--features", "std", "--open"])
            .status()
            .context("Failed to open documentation")?;
        if !status.success() {
            bail!("Could not open {}", page.display());
        }
    } else {
        println!(
            "   {}",
            "Run 'cargo run -p xtask -- doc --open' to browse them".dimmed()
        );
    }
    println!();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_page_follows_rustdoc_layout() {
        assert_eq!(
            index_page(Path::new("target"), "diagnostics"),
            Path::new("target/doc/diagnostics/index.html")
        );
        assert_eq!(
            index_page(Path::new("/tmp/t"), "gas-monitor"),
            Path::new("/tmp/t/doc/gas_monitor/index.html")
        );
    }

    #[test]
    fn every_workspace_library_is_documented() {
        let names: Vec<&str> = DOCUMENTED.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, ["platform", "diagnostics", "firmware"]);
    }
}
