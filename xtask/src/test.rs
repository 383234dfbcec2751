use anyhow::{Context, Result};
use colored::Colorize;
use std::process::Command;
use std::time::Instant;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Kind {
    Unit,
    Integration,
    Doc,
}

struct Suite {
    label: &'static str,
    kind: Kind,
    args: &'static [&'static str],
}

const SUITES: &[Suite] = &[
    Suite {
        label: "unit tests",
        kind: Kind::Unit,
        args: &["test", "--lib", "--workspace"],
    },
    Suite {
        label: "HAL properties",
        kind: Kind::Integration,
        args: &["test", "-p", "platform", "--features", "std", "--test", "hal_properties"],
    },
    Suite {
        label: "CRC integrity",
        kind: Kind::Integration,
        args: &["test", "-p", "diagnostics", "--test", "crc_integrity"],
    },
    Suite {
        label: "SRAM March",
        kind: Kind::Integration,
        args: &["test", "-p", "diagnostics", "--test", "sram_march"],
    },
    Suite {
        label: "boot lifecycle",
        kind: Kind::Integration,
        args: &["test", "-p", "firmware", "--test", "integration_boot"],
    },
    Suite {
        label: "doc tests",
        kind: Kind::Doc,
        args: &["test", "--doc", "--workspace"],
    },
];

/// Run the selected suites. `cases` overrides the proptest case count.
pub fn run(unit_only: bool, integration_only: bool, cases: Option<u32>) -> Result<()> {
    println!();
    println!("{}", "🧪 Running tests...".cyan().bold());
    println!();

    let total_start = Instant::now();

    let selected = |kind: Kind| match kind {
        Kind::Unit => !integration_only,
        Kind::Integration => !unit_only,
        Kind::Doc => !unit_only && !integration_only,
    };

    for suite in SUITES.iter().filter(|s| selected(s.kind)) {
        println!("{}", format!("  Running {}...", suite.label).cyan());
        let start = Instant::now();

        let mut cmd = Command::new("cargo");
        cmd.args(suite.args);
        if let Some(cases) = cases {
            cmd.env("PROPTEST_CASES", cases.to_string());
        }
        let output = cmd
            .output()
            .with_context(|| format!("Failed to run {}", suite.label))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            eprintln!("{}", format!("  ✗ {} failed", suite.label).red().bold());
            eprintln!();
            for line in stdout.lines() {
                eprintln!("  {line}");
            }
            anyhow::bail!("{} failed", suite.label);
        }

        println!(
            "{}",
            format!(
                "  ✓ {} passed {} in {:.2}s",
                suite.label,
                extract_test_summary(&stdout),
                start.elapsed().as_secs_f64()
            )
            .green()
        );
        println!();
    }

    println!(
        "{}",
        format!(
            "✓ All tests completed in {:.2}s",
            total_start.elapsed().as_secs_f64()
        )
        .green()
        .bold()
    );
    println!();

    Ok(())
}

/// Sum the `test result:` lines of a multi-binary cargo run.
fn extract_test_summary(output: &str) -> String {
    let (mut passed, mut failed, mut binaries) = (0u64, 0u64, 0u32);
    for line in output.lines().filter(|l| l.contains("test result:")) {
        binaries = binaries.saturating_add(1);
        for part in line.split(';') {
            let mut words = part.split_whitespace().rev();
            let (Some(label), Some(count)) = (words.next(), words.next()) else {
                continue;
            };
            let count: u64 = count.parse().unwrap_or(0);
            match label {
                "passed" => passed = passed.saturating_add(count),
                "failed" => failed = failed.saturating_add(count),
                _ => {}
            }
        }
    }
    if binaries == 0 {
        return "(summary not available)".to_string();
    }
    format!("({passed} passed, {failed} failed)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_adds_up_every_binary() {
        let out = "\
test result: ok. 5 passed; 0 failed; 0 ignored; 0 measured; 0 filtered out; finished in 0.01s
test result: ok. 12 passed; 0 failed; 1 ignored; 0 measured; 0 filtered out; finished in 1.20s
";
        assert_eq!(extract_test_summary(out), "(17 passed, 0 failed)");
    }

    #[test]
    fn summary_without_results() {
        assert_eq!(extract_test_summary("error: no such target"), "(summary not available)");
    }
}
