use std::path::{Path, PathBuf};
use std::process::Command;
use std::{env, fs};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

const BINARY: &str = "waldo";
const DEFAULT_REMOTE_PATH: &str = "/usr/local/bin/waldo";
const ENV_EXAMPLE: &str = "waldo.env.example";

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build, deploy and package the waldo agent")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the agent (eBPF object embedded)
    Build {
        #[arg(long)]
        release: bool,

        /// Cross-compilation target, e.g. aarch64-unknown-linux-gnu
        #[arg(long)]
        target: Option<String>,
    },

    /// Copy the agent to a remote host over ssh
    Deploy {
        /// user@host or host
        #[arg(long)]
        host: String,

        #[arg(long, default_value = DEFAULT_REMOTE_PATH)]
        path: String,

        #[arg(long, default_value = "true")]
        release: bool,

        #[arg(long)]
        target: Option<String>,

        /// Restart the systemd unit after copying
        #[arg(long)]
        restart: bool,
    },

    /// Install the systemd unit on a remote host
    InstallService {
        #[arg(long)]
        host: String,

        /// EnvironmentFile for the unit (ATTACH_NETDEV_KPROBES, WALDO__*, RUST_LOG)
        #[arg(long)]
        env_file: Option<String>,
    },

    /// Build a release tarball with install scripts
    Package {
        #[arg(long)]
        target: Option<String>,

        #[arg(long, default_value = "dist")]
        output: String,
    },
}

fn main() -> Result<()> {
    match Cli::parse().command {
        Commands::Build { release, target } => {
            build(release, target.as_deref())?;
        }
        Commands::Deploy {
            host,
            path,
            release,
            target,
            restart,
        } => deploy(&host, &path, release, target.as_deref(), restart)?,
        Commands::InstallService { host, env_file } => {
            install_service(&host, env_file.as_deref())?
        }
        Commands::Package { target, output } => package(target.as_deref(), &output)?,
    }
    Ok(())
}

fn project_root() -> Result<PathBuf> {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(Path::to_path_buf)
        .context("xtask must live inside the workspace")
}

fn binary_path(root: &Path, release: bool, target: Option<&str>) -> PathBuf {
    let profile = if release { "release" } else { "debug" };
    let mut path = root.join("target");
    if let Some(t) = target {
        path.push(t);
    }
    path.join(profile).join(BINARY)
}

fn run(cmd: &mut Command, what: &str) -> Result<()> {
    let status = cmd
        .status()
        .with_context(|| format!("Failed to run {}", what))?;
    if !status.success() {
        bail!("{} failed ({})", what, status);
    }
    Ok(())
}

/// Builds the agent and returns the path of the produced binary.
fn build(release: bool, target: Option<&str>) -> Result<PathBuf> {
    let root = project_root()?;
    println!("Building {}...", BINARY);

    // Only a Linux target from a non-Linux host needs `cross`.
    let cross = target.is_some_and(|t| t.contains("linux")) && !cfg!(target_os = "linux");
    let tool = if cross {
        if which::which("cross").is_err() {
            bail!(
                "Cross-compilation to Linux requires 'cross'.\n\
                 Install with: cargo install cross (Docker must be running)"
            );
        }
        "cross"
    } else {
        "cargo"
    };

    let mut cmd = Command::new(tool);
    cmd.current_dir(&root).arg("build").arg("-p").arg(BINARY);
    if release {
        cmd.arg("--release");
    }
    if let Some(t) = target {
        println!("   target: {}", t);
        cmd.arg("--target").arg(t);
    }
    run(&mut cmd, &format!("{} build", tool))?;

    let binary = binary_path(&root, release, target);
    if !binary.exists() {
        bail!("Binary not found at: {}", binary.display());
    }
    println!("Built {}", binary.display());
    Ok(binary)
}

fn deploy(
    host: &str,
    remote_path: &str,
    release: bool,
    target: Option<&str>,
    restart: bool,
) -> Result<()> {
    let binary = build(release, target)?;
    let staging = format!("/tmp/{}.tmp", BINARY);

    println!("Deploying to {}:{}", host, remote_path);
    run(
        Command::new("scp")
            .arg(&binary)
            .arg(format!("{}:{}", host, staging)),
        "scp",
    )?;
    run(
        Command::new("ssh").arg(host).arg(format!(
            "sudo install -m 755 {} {} && rm -f {}",
            staging, remote_path, staging
        )),
        "remote install",
    )?;

    if restart {
        let status = Command::new("ssh")
            .arg(host)
            .arg(format!("sudo systemctl restart {}", BINARY))
            .status()
            .context("Failed to run ssh")?;
        if status.success() {
            println!("Service restarted");
        } else {
            println!("Service restart failed (is the unit installed?)");
        }
    }
    Ok(())
}

fn install_service(host: &str, env_file: Option<&str>) -> Result<()> {
    let unit = systemd_unit(env_file).replace('\'', "'\\''");
    let cmd = format!(
        "echo '{unit}' | sudo tee /etc/systemd/system/{BINARY}.service > /dev/null && \
         sudo systemctl daemon-reload && \
         sudo systemctl enable {BINARY}"
    );

    println!("Installing systemd unit on {}...", host);
    run(Command::new("ssh").arg(host).arg(&cmd), "remote unit install")?;
    println!("Unit installed. Start with: ssh {} sudo systemctl start {}", host, BINARY);
    Ok(())
}

/// SIGINT is the agent's only shutdown path, so the unit stops it with it.
fn systemd_unit(env_file: Option<&str>) -> String {
    let env_line = env_file
        .map(|f| format!("EnvironmentFile={}", f))
        .unwrap_or_default();

    format!(
        r#"[Unit]
Description=waldo wireless scan latency monitor
After=network.target

[Service]
Type=simple
ExecStart={DEFAULT_REMOTE_PATH}
KillSignal=SIGINT
Restart=on-failure
RestartSec=5
{env_line}

CapabilityBoundingSet=CAP_SYS_ADMIN CAP_BPF CAP_PERFMON
AmbientCapabilities=CAP_SYS_ADMIN CAP_BPF CAP_PERFMON

[Install]
WantedBy=multi-user.target
"#
    )
}

fn package(target: Option<&str>, output_dir: &str) -> Result<()> {
    let binary = build(true, target)?;
    let root = project_root()?;
    let output = root.join(output_dir);

    let arch = target.unwrap_or(env::consts::ARCH);
    let name = format!("{}-{}-{}", BINARY, env!("CARGO_PKG_VERSION"), arch);
    let staging = output.join(&name);
    fs::create_dir_all(&staging).context("Failed to create package directory")?;

    fs::copy(&binary, staging.join(BINARY))?;
    let env_example = root.join(ENV_EXAMPLE);
    if env_example.exists() {
        fs::copy(&env_example, staging.join(ENV_EXAMPLE))?;
    }

    let install = format!(
        r#"#!/bin/bash
set -e

INSTALL_DIR="${{INSTALL_DIR:-/usr/local/bin}}"
CONFIG_DIR="${{CONFIG_DIR:-/etc/{BINARY}}}"

sudo install -m 755 {BINARY} "$INSTALL_DIR/{BINARY}"
sudo mkdir -p "$CONFIG_DIR"
if [ -f {ENV_EXAMPLE} ] && [ ! -f "$CONFIG_DIR/{BINARY}.env" ]; then
    sudo cp {ENV_EXAMPLE} "$CONFIG_DIR/{BINARY}.env"
fi

cat > /tmp/{BINARY}.service << 'EOF'
{unit}
EOF
sudo mv /tmp/{BINARY}.service /etc/systemd/system/{BINARY}.service
sudo systemctl daemon-reload
sudo systemctl enable {BINARY}

echo "Installed. Start with: sudo systemctl start {BINARY}"
"#,
        unit = systemd_unit(Some(&format!("/etc/{}/{}.env", BINARY, BINARY))),
    );
    fs::write(staging.join("install.sh"), install)?;

    let tarball = output.join(format!("{}.tar.gz", name));
    run(
        Command::new("tar")
            .current_dir(&output)
            .arg("-czf")
            .arg(&tarball)
            .arg(&name),
        "tar",
    )?;
    fs::remove_dir_all(&staging)?;

    println!("Package created: {}", tarball.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_path_layout() {
        let root = Path::new("/w");
        assert_eq!(
            binary_path(root, true, None),
            PathBuf::from("/w/target/release/waldo")
        );
        assert_eq!(
            binary_path(root, false, Some("aarch64-unknown-linux-gnu")),
            PathBuf::from("/w/target/aarch64-unknown-linux-gnu/debug/waldo")
        );
    }

    #[test]
    fn test_unit_uses_sigint_and_env_file() {
        let unit = systemd_unit(Some("/etc/waldo/waldo.env"));
        assert!(unit.contains("KillSignal=SIGINT"));
        assert!(unit.contains("EnvironmentFile=/etc/waldo/waldo.env"));
        assert!(!systemd_unit(None).contains("EnvironmentFile"));
    }
}
