use anyhow::{Context, Result};
use colored::Colorize;
use std::process::Command;
use std::time::Instant;

/// Bare-metal target used to prove the libraries stay `no_std`.
const NO_STD_TARGET: &str = "thumbv6m-none-eabi";

struct Step {
    label: &'static str,
    args: &'static [&'static str],
    /// Failure aborts the run; otherwise it is only reported.
    required: bool,
}

const STEPS: &[Step] = &[
    Step {
        label: "platform (no_std)",
        args: &["check", "-p", "platform", "--target", NO_STD_TARGET, "--no-default-features"],
        required: true,
    },
    Step {
        label: "diagnostics (no_std)",
        args: &["check", "-p", "diagnostics", "--target", NO_STD_TARGET, "--no-default-features"],
        required: true,
    },
    Step {
        label: "firmware (no_std)",
        args: &["check", "-p", "firmware", "--target", NO_STD_TARGET, "--no-default-features"],
        required: true,
    },
    Step {
        label: "emulator (host)",
        args: &["check", "-p", "firmware", "--features", "emulator", "--all-targets"],
        required: true,
    },
    Step {
        label: "clippy",
        args: &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"],
        required: false,
    },
    Step {
        label: "formatting",
        args: &["fmt", "--all", "--check"],
        required: false,
    },
];

pub fn run() -> Result<()> {
    println!();
    println!("{}", "🔍 Checking builds...".cyan().bold());
    println!();

    let total_start = Instant::now();

    for step in STEPS {
        println!("{}", format!("  Checking {}...", step.label).cyan());
        let start = Instant::now();
        let output = Command::new("cargo")
            .args(step.args)
            .output()
            .with_context(|| format!("Failed to run {}", step.label))?;

        if output.status.success() {
            println!(
                "{}",
                format!("  ✓ {} passed in {:.2}s", step.label, start.elapsed().as_secs_f64()).green()
            );
        } else if step.required {
            eprintln!("{}", format!("  ✗ {} failed", step.label).red().bold());
            eprintln!();
            eprintln!("{}", String::from_utf8_lossy(&output.stderr));
            anyhow::bail!("{} failed", step.label);
        } else {
            eprintln!("{}", format!("  ⚠ {} reported issues", step.label).yellow().bold());
            eprintln!();
            eprintln!("{}", String::from_utf8_lossy(&output.stderr));
        }
        println!();
    }

    println!(
        "{}",
        format!(
            "✓ All checks completed in {:.2}s",
            total_start.elapsed().as_secs_f64()
        )
        .green()
        .bold()
    );
    println!();

    Ok(())
}
