fn main() {
    uniffi::generate_scaffolding("src/beepcon.udl").unwrap();
}
