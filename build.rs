// Code generation for the RPC binding (only with the `grpc` feature)

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/metrics.proto");

    #[cfg(feature = "grpc")]
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(&["proto/metrics.proto"], &["proto"])?;

    Ok(())
}
