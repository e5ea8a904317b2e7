//! Generated protobuf bindings.

/// Kubernetes KMS v2 plugin API.
pub mod kms_v2 {
    tonic::include_proto!("v2");
}

/// Secrets Store CSI driver provider API.
pub mod csi_v1alpha1 {
    tonic::include_proto!("v1alpha1");
}
