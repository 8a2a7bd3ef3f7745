fn main() {
    protobuf_codegen::Codegen::new()
        .pure()
        .cargo_out_dir("protos")
        .include("src")
        .input("src/manifest/protos/sophon_manifest.proto")
        .run_from_script();
}
