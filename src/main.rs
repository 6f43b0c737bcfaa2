fn main() {
    if let Err(err) = robo_render::run() {
        eprintln!("Application error: {err}");
    }
}
