use std::{env, path::PathBuf, process::Command};

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());

    println!("cargo:rerun-if-changed=../waldo-ebpf/src");
    println!("cargo:rerun-if-changed=../waldo-common/src");

    let arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap();

    let bpf_target = match arch.as_str() {
        "x86_64" | "x86" | "aarch64" | "arm" | "riscv64" => "bpfel-unknown-none",
        "mips" | "mips64" | "powerpc" | "powerpc64" | "s390x" => "bpfeb-unknown-none",
        _ => {
            eprintln!(
                "Warning: Unknown architecture '{}', defaulting to bpfel-unknown-none",
                arch
            );
            "bpfel-unknown-none"
        }
    };

    let ebpf_dir = PathBuf::from("../waldo-ebpf");

    // Separate target directory so the nested cargo does not wait on our lock
    let ebpf_target_dir = out_dir.join("ebpf-target");

    let cargo = env::var("CARGO").unwrap_or_else(|_| "cargo".to_string());

    let status = Command::new(cargo)
        .current_dir(&ebpf_dir)
        .env("RUSTUP_TOOLCHAIN", "nightly")
        .env("CARGO_TARGET_DIR", &ebpf_target_dir)
        .env_remove("RUSTC")
        .env_remove("RUSTC_WORKSPACE_WRAPPER")
        .args([
            "build",
            "--release",
            &format!("--target={}", bpf_target),
            "-Z",
            "build-std=core",
        ])
        .stdout(std::process::Stdio::inherit())
        .stderr(std::process::Stdio::inherit())
        .status();

    let out_file = out_dir.join("waldo");

    // Without a nightly toolchain and bpf-linker the user-space crate still
    // builds (and its tests still run); loading the empty object fails at
    // startup instead.
    match status {
        Ok(status) if status.success() => {
            let ebpf_binary = ebpf_target_dir.join(format!("{}/release/waldo", bpf_target));
            std::fs::copy(&ebpf_binary, &out_file).expect("Failed to copy eBPF object file");
        }
        Ok(status) => {
            println!("cargo:warning=eBPF build failed ({status}); embedding an empty object");
            std::fs::write(&out_file, b"").expect("Failed to write placeholder eBPF object");
        }
        Err(e) => {
            println!("cargo:warning=Failed to run cargo for eBPF build: {e}; embedding an empty object");
            std::fs::write(&out_file, b"").expect("Failed to write placeholder eBPF object");
        }
    }
}
