use std::error::Error;

use flexi_logger::Logger;

fn main() -> Result<(), Box<dyn Error>> {
    let _logger = Logger::try_with_env_or_str("info")?.start()?;
    patchwire::run(std::env::args().skip(1).collect())
}
