use anyhow::Result;
use clap::Parser;

#[derive(Debug, Parser)]
struct JustParse {
    filename: std::path::PathBuf,
}

fn main() -> Result<()> {
    let args = JustParse::parse();
    heapdb::logging::init(heapdb::logging::LogFormat::Pretty, "warn")?;

    let image = heapdb::DebugInfoImage::open(&args.filename)?;

    let enums = image
        .types()
        .filter(|(_, t)| t.kind == heapdb::TypeKind::Enum)
        .count();
    println!(
        "{}: {} types ({} enums), {} namespace constants, {}-byte pointers",
        args.filename.display(),
        image.type_count(),
        enums,
        image.globals().count(),
        image.pointer_size(),
    );

    Ok(())
}
