use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use cortado::loader::{ClassLoader, ClassPathLoader};
use cortado::translator::{DumpBackend, Translator};
use cortado::vm::{Jvm, JvmOptions};
use jclass::descriptors::TypeDescriptor;

/// Loads a class from the classpath and runs one of its static methods.
#[derive(Parser)]
#[command(name = "cortado", version, about)]
struct Args {
    /// Binary name of the class to load, e.g. demo/Main.
    class: String,
    /// Directories searched for .class files.
    #[arg(short = 'c', long = "classpath", default_value = ".")]
    classpath: Vec<PathBuf>,
    /// Static method to invoke; must take no arguments.
    #[arg(short, long, default_value = "main")]
    entry: String,
    /// Run the structural verifier before invoking.
    #[arg(long)]
    verify: bool,
    /// Print the translated IR of the entry method instead of running it.
    #[arg(long)]
    dump_ir: bool,
    /// Highest class-file major version to accept.
    #[arg(long, default_value_t = jclass::SUPPORTED_MAJOR_VERSION)]
    class_version: u16,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let jvm = Jvm::with_options(JvmOptions {
        version_ceiling: args.class_version,
        ..JvmOptions::default()
    });
    let loader = ClassPathLoader::new(&jvm, args.classpath.clone());
    let class = loader
        .load_class(&args.class)?
        .ok_or_else(|| format!("class {} not found on the classpath", args.class))?;
    if args.verify {
        class.verify()?;
    }
    let method = class
        .methods()
        .into_iter()
        .find(|method| method.name == args.entry)
        .ok_or_else(|| format!("method {} not found in {}", args.entry, class.name))?;

    if args.dump_ir {
        let mut backend = DumpBackend::default();
        Translator::new(&method).translate(&mut backend)?;
        println!("{}", backend.into_text());
        return Ok(());
    }

    match jvm.invoke(&method)? {
        Some(word) => match &method.return_type {
            Some(TypeDescriptor::Long) => println!("{}", word as i64),
            Some(TypeDescriptor::Object(_)) | Some(TypeDescriptor::Array(_)) => {
                println!("{word:#x}")
            }
            _ => println!("{}", word as u32 as i32),
        },
        None => {}
    }
    Ok(())
}
