//! Prints the NatsStreamingCluster CRD manifest.

use kube::CustomResourceExt;
use nats_streaming_operator::NatsStreamingCluster;

fn main() -> anyhow::Result<()> {
    let crd = serde_yaml::to_string(&NatsStreamingCluster::crd())?;
    println!("{crd}");
    Ok(())
}
