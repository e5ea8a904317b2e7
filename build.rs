fn main() -> Result<(), Box<dyn std::error::Error>> {
    // KMS v2 (kube-apiserver envelope encryption) and the secrets-store CSI
    // driver provider API. Clients are generated too so integration tests can
    // dial the servers over their Unix sockets.
    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(
            &["proto/kms/v2/api.proto", "proto/csi/v1alpha1/service.proto"],
            &["proto"],
        )?;

    println!("cargo:rerun-if-changed=proto");
    Ok(())
}
