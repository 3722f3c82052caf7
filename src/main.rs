fn main() {
    kwik_tools::cli::run();
}
