// SPDX-License-Identifier: CEPL-1.0
fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=shaders/mesh.vert");
    println!("cargo:rerun-if-changed=shaders/mesh.frag");

    #[cfg(feature = "builtin-shaders")]
    compile_shaders();
}

#[cfg(feature = "builtin-shaders")]
fn compile_shaders() {
    use std::{env, fs, path::PathBuf};

    let out = PathBuf::from(env::var("OUT_DIR").unwrap());
    let src = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap()).join("shaders");

    let comp = shaderc::Compiler::new().unwrap();
    let mut opts = shaderc::CompileOptions::new().unwrap();
    // Vulkan 1.1 to match the instance API version
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_1 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    for (name, kind) in [
        ("mesh.vert", shaderc::ShaderKind::Vertex),
        ("mesh.frag", shaderc::ShaderKind::Fragment),
    ] {
        let text = fs::read_to_string(src.join(name)).unwrap();
        let spv = comp
            .compile_into_spirv(&text, kind, name, "main", Some(&opts))
            .unwrap();
        fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8()).unwrap();
    }

    println!("cargo:rustc-env=FORGE_BUILTIN_SHADER_DIR={}", out.display());
}
