use zlmb_queue::{Broker, BrokerConfig, Shutdown};

use crate::cmd::{install_ctrlc_handler, parse_endpoint, BrokerArgs};
use crate::exit::{queue_error, CliResult, SUCCESS};
use crate::output::{print_stats, OutputFormat};

pub fn run(args: BrokerArgs, format: OutputFormat) -> CliResult<i32> {
    let endpoint = parse_endpoint(&args.endpoint)?;
    let config = BrokerConfig {
        capacity: args.capacity.get(),
        ..BrokerConfig::default()
    };
    let broker = Broker::bind_with_config(&endpoint, config)
        .map_err(|err| queue_error("bind failed", err))?;

    let shutdown = Shutdown::new();
    install_ctrlc_handler(shutdown.clone())?;

    let stats = broker
        .run(&shutdown)
        .map_err(|err| queue_error("broker failed", err))?;
    print_stats("broker", &stats, format);
    Ok(SUCCESS)
}
