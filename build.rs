fn main() {
    let proto = "proto/mergelog.proto";
    let fds = protox::compile([proto], ["proto"]).expect("failed to compile mergelog.proto");
    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_fds(fds)
        .expect("failed to generate mergelog gRPC bindings");
    println!("cargo:rerun-if-changed={proto}");
}
