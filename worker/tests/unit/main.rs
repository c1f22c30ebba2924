mod fixtures;
mod test_fsm;
mod test_generator;
mod test_tracker;
mod test_validator;
mod test_vault_loki;
