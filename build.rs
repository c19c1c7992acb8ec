use std::env;
use std::fs;
use std::io;
use std::path::Path;

fn main() -> io::Result<()> {
    // Create config template if it doesn't exist
    let out_dir = env::var("OUT_DIR").unwrap_or_else(|_| "./".to_string());
    let template_path = Path::new(&out_dir).join("../../../esdemux.template.toml");

    let template = r#"# esdemux configuration template
# Copy this file to 'esdemux.toml' next to the binary that uses the library

# Read-ahead buffer of the Annex B framer, in bytes
buffer_size = 500000

# Build a trace tree of every parsed syntax element
trace = false

# Stop parsing after this many frames (leave empty for no limit)
# frame_limit = 1000

# Run the HRD buffer simulation for AVC streams
hrd = true
"#;

    fs::write(template_path, template)?;
    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
