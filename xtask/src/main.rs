//! Build automation tasks for the reservoir workspace.
//!
//! Run with `cargo xtask <command>`.
//!
//! ## Available Commands
//!
//! - `ci`: Run all CI checks (format, lint, test, docs)
//! - `fmt`: Check/apply code formatting
//! - `clippy`: Run clippy lints
//! - `test`: Run the test suites
//! - `doc`: Generate documentation
//! - `bench`: Run the pool benchmarks
//! - `fuzz`: Run fuzz tests (requires cargo-fuzz + nightly)
//! - `semver`: Check public API compatibility

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(name = "xtask", about = "Build automation for reservoir")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run all checks (format, lint, test, docs)
    Ci,
    /// Run cargo fmt (--check by default, --fix to apply)
    Fmt {
        /// Apply formatting fixes
        #[arg(long)]
        fix: bool,
    },
    /// Run clippy on every target
    Clippy {
        /// Apply clippy suggestions
        #[arg(long)]
        fix: bool,
    },
    /// Run tests
    Test {
        /// Test a specific package
        #[arg(short, long)]
        package: Option<String>,
        /// Number of proptest cases per property
        #[arg(long)]
        proptest_cases: Option<u32>,
    },
    /// Generate documentation
    Doc {
        /// Open documentation in browser
        #[arg(long)]
        open: bool,
    },
    /// Run benchmarks
    Bench {
        /// Benchmark filter pattern
        filter: Option<String>,
    },
    /// Run fuzz tests (requires cargo-fuzz + nightly)
    Fuzz {
        /// Fuzz target to run
        #[arg(default_value = "connection_string")]
        target: String,
        /// Maximum runtime in seconds
        #[arg(long, default_value = "60")]
        max_time: u64,
        /// List available fuzz targets
        #[arg(long)]
        list: bool,
    },
    /// Check for semver violations (requires cargo-semver-checks)
    Semver,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;
    sh.change_dir(workspace_root()?);

    match cli.command {
        Command::Ci => {
            println!("Running CI checks...");
            fmt(&sh, false)?;
            clippy(&sh, false)?;
            test(&sh, None, None)?;
            doc(&sh, false)?;
            println!("\n✅ All CI checks passed!");
        }
        Command::Fmt { fix } => fmt(&sh, fix)?,
        Command::Clippy { fix } => clippy(&sh, fix)?,
        Command::Test {
            package,
            proptest_cases,
        } => test(&sh, package.as_deref(), proptest_cases)?,
        Command::Doc { open } => doc(&sh, open)?,
        Command::Bench { filter } => bench(&sh, filter.as_deref())?,
        Command::Fuzz {
            target,
            max_time,
            list,
        } => fuzz(&sh, &target, max_time, list)?,
        Command::Semver => semver(&sh)?,
    }

    Ok(())
}

fn workspace_root() -> Result<PathBuf> {
    let output = std::process::Command::new("cargo")
        .args(["locate-project", "--workspace", "--message-format=plain"])
        .output()
        .context("failed to run cargo locate-project")?;

    let manifest = String::from_utf8(output.stdout).context("invalid UTF-8 in cargo output")?;

    Ok(PathBuf::from(manifest.trim())
        .parent()
        .context("failed to get workspace root")?
        .to_path_buf())
}

fn fmt(sh: &Shell, fix: bool) -> Result<()> {
    if fix {
        println!("Applying formatting...");
        cmd!(sh, "cargo fmt --all").run()?;
    } else {
        println!("Checking formatting...");
        cmd!(sh, "cargo fmt --all -- --check").run()?;
    }
    println!("✅ Formatting done.");
    Ok(())
}

fn clippy(sh: &Shell, fix: bool) -> Result<()> {
    println!("Running clippy...");
    if fix {
        cmd!(sh, "cargo clippy --workspace --all-targets --fix --allow-dirty").run()?;
    } else {
        cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;
    }
    println!("✅ Clippy done.");
    Ok(())
}

fn test(sh: &Shell, package: Option<&str>, proptest_cases: Option<u32>) -> Result<()> {
    println!("Running tests...");

    let scope: Vec<&str> = match package {
        Some(pkg) => vec!["-p", pkg],
        None => vec!["--workspace"],
    };

    let _cases = proptest_cases.map(|n| sh.push_env("PROPTEST_CASES", n.to_string()));
    let scope_ref = &scope;
    cmd!(sh, "cargo test {scope_ref...} --all-targets").run()?;
    // Doc tests are not part of --all-targets.
    cmd!(sh, "cargo test {scope...} --doc").run()?;

    println!("✅ All tests passed.");
    Ok(())
}

fn doc(sh: &Shell, open: bool) -> Result<()> {
    println!("Generating documentation...");
    let _rustdocflags = sh.push_env("RUSTDOCFLAGS", "-D warnings");
    let open = open.then_some("--open");
    cmd!(sh, "cargo doc --workspace --no-deps {open...}").run()?;
    println!("✅ Documentation generated.");
    Ok(())
}

fn bench(sh: &Shell, filter: Option<&str>) -> Result<()> {
    println!("Running benchmarks...");
    let filter: Vec<&str> = filter.into_iter().collect();
    cmd!(sh, "cargo bench -p reservoir -- {filter...}").run()?;
    Ok(())
}

fn fuzz(sh: &Shell, target: &str, max_time: u64, list: bool) -> Result<()> {
    let targets_dir = sh.current_dir().join("fuzz").join("fuzz_targets");
    if !targets_dir.exists() {
        bail!("Fuzz targets not found at {}", targets_dir.display());
    }

    let mut targets = Vec::new();
    for entry in fs::read_dir(&targets_dir)? {
        if let Some(name) = entry?.path().file_stem() {
            targets.push(name.to_string_lossy().into_owned());
        }
    }
    targets.sort();

    if list {
        println!("Available fuzz targets:");
        for name in &targets {
            println!("  - {name}");
        }
        return Ok(());
    }

    if !targets.iter().any(|t| t == target) {
        bail!("Unknown fuzz target `{target}` (try --list)");
    }

    println!("Running fuzz target: {target} for {max_time}s");
    let max_time = max_time.to_string();
    // cargo-fuzz requires nightly
    cmd!(
        sh,
        "cargo +nightly fuzz run {target} -- -max_total_time={max_time}"
    )
    .run()?;

    Ok(())
}

fn semver(sh: &Shell) -> Result<()> {
    println!("Checking semver compatibility...");
    for package in ["reservoir", "reservoir-sql"] {
        cmd!(sh, "cargo semver-checks check-release -p {package}").run()?;
    }
    println!("✅ No semver violations.");
    Ok(())
}
