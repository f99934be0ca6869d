//! Prints the CcRuntime CustomResourceDefinition as YAML.
//!
//! `cargo run -p crds --bin crdgen > config/crd/ccruntime.yaml`

use crds::CcRuntime;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&CcRuntime::crd())?);
    Ok(())
}
