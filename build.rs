// build.rs

use glob::glob;
use std::env;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// An assembly artifact discovered in the data directory.
#[derive(Debug)]
struct ArtifactInstance {
    pub name: String,
    pub path: PathBuf,
}

/// Discovers all `.kfa` artifacts under `data/`.
fn get_all_instances() -> Vec<ArtifactInstance> {
    glob("data/*.kfa")
        .expect("Failed to read glob pattern")
        .filter_map(Result::ok)
        .map(|path| {
            let name = path
                .file_stem()
                .unwrap()
                .to_string_lossy()
                .replace(['-', '.'], "_");
            ArtifactInstance { name, path }
        })
        .collect()
}

fn main() {
    println!("cargo:rerun-if-changed=data");

    let out_dir = env::var("OUT_DIR").unwrap();
    let dest_path = Path::new(&out_dir).join("artifact_tests.rs");
    let mut file = BufWriter::new(File::create(&dest_path).unwrap());

    // One `#[test]` per artifact, so failures name the offending file.
    for instance in get_all_instances() {
        let path = env::current_dir().unwrap().join(&instance.path);
        writeln!(
            file,
            r#"
#[test]
fn artifact_test_{name}() -> anyhow::Result<()> {{
    run_artifact_test("{path}")
}}
"#,
            name = instance.name,
            path = path.to_str().unwrap().escape_default()
        )
        .unwrap();
    }
}
