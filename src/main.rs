fn main() {
    if let Err(err) = talkhead::cli::main() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
