use state_machines::state_machine;

state_machine! {
    name: IngestionMachine,
    state: IngestionState,
    initial: Ready,
    states: [Ready, Fetched, Extracted, Chunked, Committed, Failed],
    events {
        fetch { transition: { from: Ready, to: Fetched } }
        extract { transition: { from: Fetched, to: Extracted } }
        chunk { transition: { from: Extracted, to: Chunked } }
        commit { transition: { from: Chunked, to: Committed } }
        abort {
            transition: { from: Ready, to: Failed }
            transition: { from: Fetched, to: Failed }
            transition: { from: Extracted, to: Failed }
            transition: { from: Chunked, to: Failed }
        }
    }
}

pub fn ready() -> IngestionMachine<(), Ready> {
    IngestionMachine::new(())
}
