use std::{env, fs, path::PathBuf};

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").unwrap());
    let dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap()).join("shaders");

    let comp = shaderc::Compiler::new().unwrap();
    let mut opts = shaderc::CompileOptions::new().unwrap();
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_3 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    for (file, kind) in [
        ("quad.vert", shaderc::ShaderKind::Vertex),
        ("quad.frag", shaderc::ShaderKind::Fragment),
    ] {
        let path = dir.join(file);
        let src = fs::read_to_string(&path).unwrap();
        let spv = comp
            .compile_into_spirv(&src, kind, file, "main", Some(&opts))
            .unwrap_or_else(|e| panic!("{}: {e}", path.display()));
        fs::write(out.join(format!("{file}.spv")), spv.as_binary_u8()).unwrap();
        println!("cargo:rerun-if-changed={}", path.display());
    }
    println!("cargo:rerun-if-changed=build.rs");
}
