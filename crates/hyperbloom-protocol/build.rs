use std::path::PathBuf;

fn main() {
    let out_dir = PathBuf::from(std::env::var("OUT_DIR").unwrap());

    protobuf_codegen_pure::Codegen::new()
        .out_dir(&out_dir)
        .inputs(&["proto/hyperbloom.proto"])
        .include("proto")
        .run()
        .expect("protobuf codegen failed");

    println!("cargo:rerun-if-changed=proto/hyperbloom.proto");
}
