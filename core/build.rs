fn main() {
    uniffi::generate_scaffolding("src/api.udl").unwrap();
}
