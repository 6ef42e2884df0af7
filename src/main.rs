use catmatch::catalog::CatalogBuilder;
use catmatch::clock::ManualClock;
use catmatch::config::ExperimentConfig;
use catmatch::log::CsvFileSink;
use catmatch::matrix::{parse_coordinates, DistanceMatrix};
use catmatch::pack::{export_pack, read_manifest, ExportOptions, PackListing};
use catmatch::pools::StimulusPools;
use catmatch::prng::Prng;
use catmatch::session::Session;
use catmatch::simulate::{ParticipantProfile, SimulatedParticipant};
use std::path::{Path, PathBuf};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let result = match args.get(1).map(String::as_str) {
        None | Some("--help") | Some("-h") | Some("help") => {
            print_help();
            return;
        }
        Some("build") => run_build(&args[2..]),
        Some("inspect") => run_inspect(&args[2..]),
        Some("simulate") => run_simulate(&args[2..]),
        Some(other) => {
            eprintln!("Unknown command: {other}");
            print_help();
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn print_help() {
    println!("catmatch - adaptive category-learning experiment");
    println!();
    println!("USAGE:");
    println!("  catmatch build <coords.txt> <shapes_dir> <pack_dir> [--levels N] [--stride N] [--ext EXT]");
    println!("  catmatch inspect <pack_dir>");
    println!("  catmatch simulate <pack_dir> [--config FILE] [--out FILE] [--seed N] [--abort-after N]");
    println!("  catmatch help");
    println!();
    println!("COMMANDS:");
    println!("  build     Split shapes into categories and difficulty levels, then export a pack");
    println!("  inspect   Print the catalog stored in a pack manifest");
    println!("  simulate  Run a full session against a simulated participant and write its log");
}

/// Positional arguments and `--flag value` pairs.
struct Args {
    positional: Vec<String>,
    flags: Vec<(String, String)>,
}

impl Args {
    fn parse(raw: &[String]) -> Result<Self, String> {
        let mut positional = Vec::new();
        let mut flags = Vec::new();
        let mut it = raw.iter();
        while let Some(a) = it.next() {
            if let Some(name) = a.strip_prefix("--") {
                let value = it
                    .next()
                    .ok_or_else(|| format!("--{name} needs a value"))?;
                flags.push((name.to_string(), value.clone()));
            } else {
                positional.push(a.clone());
            }
        }
        Ok(Self { positional, flags })
    }

    fn flag(&self, name: &str) -> Option<&str> {
        self.flags
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn number<T: std::str::FromStr>(&self, name: &str) -> Result<Option<T>, String> {
        self.flag(name)
            .map(|v| v.parse().map_err(|_| format!("--{name}: bad number {v:?}")))
            .transpose()
    }

    fn path(&self, i: usize, what: &str) -> Result<PathBuf, String> {
        self.positional
            .get(i)
            .map(PathBuf::from)
            .ok_or_else(|| format!("missing {what}"))
    }
}

fn run_build(raw: &[String]) -> Result<(), String> {
    let args = Args::parse(raw)?;
    let coords_path = args.path(0, "<coords.txt>")?;
    let shapes_dir = args.path(1, "<shapes_dir>")?;
    let pack_dir = args.path(2, "<pack_dir>")?;
    let levels: usize = args.number("levels")?.unwrap_or(5);
    let mut options = ExportOptions::default();
    if let Some(stride) = args.number("stride")? {
        options.stride = stride;
    }
    if let Some(ext) = args.flag("ext") {
        options.extension = ext.trim_start_matches('.').to_string();
    }

    let text = std::fs::read_to_string(&coords_path)
        .map_err(|e| format!("cannot read {}: {e}", coords_path.display()))?;
    let coords = parse_coordinates(&text).map_err(|e| e.to_string())?;
    let matrix = DistanceMatrix::from_coordinates(&coords).map_err(|e| e.to_string())?;
    let catalog = CatalogBuilder::new(2, levels)
        .build(&matrix)
        .map_err(|e| e.to_string())?;

    let manifest =
        export_pack(&catalog, &shapes_dir, &pack_dir, &options).map_err(|e| e.to_string())?;
    println!(
        "exported {} exemplars and {} prototypes to {}",
        manifest.exemplars.len(),
        catalog.prototypes.len(),
        pack_dir.display()
    );
    Ok(())
}

fn run_inspect(raw: &[String]) -> Result<(), String> {
    let args = Args::parse(raw)?;
    let pack_dir = args.path(0, "<pack_dir>")?;
    let manifest = read_manifest(&pack_dir).map_err(|e| e.to_string())?;
    let catalog = &manifest.catalog;

    println!(
        "{} shapes, {} categories, {} difficulty levels",
        catalog.shapes.len(),
        catalog.categories,
        catalog.difficulty_levels
    );
    for proto in &catalog.prototypes {
        println!("category {}: prototype shape {}", proto.category, proto.shape);
    }
    println!();
    println!("{:<10} {:<10} {:>8} {:>10}", "category", "level", "shapes", "exemplars");
    for c in 1..=catalog.categories {
        for d in 1..=catalog.difficulty_levels {
            let exemplars = manifest
                .exemplars
                .iter()
                .filter(|e| e.category == c && e.difficulty == d)
                .count();
            println!(
                "{:<10} {:<10} {:>8} {:>10}",
                c,
                d,
                catalog.cell(c, d).count(),
                exemplars
            );
        }
    }
    Ok(())
}

fn run_simulate(raw: &[String]) -> Result<(), String> {
    let args = Args::parse(raw)?;
    let pack_dir = args.path(0, "<pack_dir>")?;
    let mut config = match args.flag("config") {
        Some(p) => ExperimentConfig::load(Path::new(p)).map_err(|e| e.to_string())?,
        None => ExperimentConfig::default(),
    };
    if let Some(seed) = args.number("seed")? {
        config.seed = Some(seed);
    }
    let out = args
        .flag("out")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("output.csv"));
    let profile = ParticipantProfile {
        abort_after: args.number("abort-after")?,
        ..ParticipantProfile::default()
    };

    let listing = PackListing::scan(&pack_dir, config.categories, config.difficulty_levels)
        .map_err(|e| e.to_string())?;
    let mut rng = config.seed.map(Prng::new).unwrap_or_else(Prng::from_entropy);
    let pools = StimulusPools::from_listing(&listing, &config, &mut rng).map_err(|e| e.to_string())?;

    let clock = ManualClock::new();
    let participant = SimulatedParticipant::new(clock.clone(), profile, rng.next_u32() as u64);
    let mut session = Session::new(config, pools, participant, clock, CsvFileSink::new(&out))
        .with_rng(rng);
    let summary = session.run().map_err(|e| e.to_string())?;

    let json = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
    println!("{json}");
    println!("log written to {}", out.display());
    Ok(())
}
