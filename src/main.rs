fn main() {
    std::process::exit(dcp::run());
}
