fn main() {
    if let Err(err) = blockidx::run_entry() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
