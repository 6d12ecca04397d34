// Tester command handling

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Quit,
    Reset,
}

impl Command {
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        match input.to_lowercase().as_str() {
            "q" | "quit" | "exit" => Some(Command::Quit),
            _ if input == "/reset" => Some(Command::Reset),
            _ => None,
        }
    }

    pub fn reply(&self) -> &'static str {
        match self {
            Command::Quit => "Bye!",
            Command::Reset => "Context reset.",
        }
    }
}
