fn main() {
    let exit_code = match mason::run::run() {
        Ok(code) => code,
        Err(err) => {
            println!("mason: error: {:#}", err);
            1
        }
    };
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}
