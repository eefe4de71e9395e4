#[macro_use]
extern crate log;

fn main() {
    pretty_env_logger::init();

    let config = match esign_workflow::Config::load() {
        Ok(c) => c,
        Err(err) => {
            error!("Unable to load config: {}", err);
            std::process::exit(1);
        }
    };
    let store = match esign_workflow::store::postgres::PgStore::from_config(&config) {
        Ok(s) => s,
        Err(err) => {
            error!("Unable to connect to database: {}", err);
            std::process::exit(1);
        }
    };

    info!("Running database migrations...");
    if let Err(err) = store.run_migrations() {
        error!("{}", err);
        std::process::exit(1);
    }
    info!("Database is up to date");
}
