//! Interactive shell.
//!
//! A line editor over the blocking keyboard read, with echo, backspace,
//! and ESC-clears-line. Commands live in a static table in
//! [`commands`]; each gets the remainder of the line as its argument
//! string.

pub mod commands;

use crate::arch::x86_64::vga::{self, Color};
use crate::drivers::keyboard;

const BUFFER_SIZE: usize = 256;

pub struct Shell {
    buffer: [u8; BUFFER_SIZE],
    len: usize,
}

impl Shell {
    pub const fn new() -> Self {
        Self {
            buffer: [0; BUFFER_SIZE],
            len: 0,
        }
    }

    /// Run the shell forever. This is the body of the shell task.
    pub fn run(&mut self) -> ! {
        println!();
        println!("Type 'help' for available commands.");
        loop {
            self.prompt();
            let line = self.read_line();
            execute(line);
        }
    }

    fn prompt(&self) {
        vga::set_color(Color::LightCyan, Color::Black);
        print!("ferrite");
        vga::set_color(Color::White, Color::Black);
        print!("> ");
    }

    /// Blocking line editor. Returns the completed line on Enter.
    fn read_line(&mut self) -> &str {
        self.len = 0;
        loop {
            match keyboard::getchar() {
                '\n' | '\r' => {
                    println!();
                    break;
                }
                '\u{8}' => {
                    if self.len > 0 {
                        self.len -= 1;
                        print!("\u{8}");
                    }
                }
                // ESC wipes the pending line.
                '\u{1b}' => {
                    while self.len > 0 {
                        self.len -= 1;
                        print!("\u{8}");
                    }
                }
                c if c.is_ascii() && !c.is_control() => {
                    if self.len < BUFFER_SIZE - 1 {
                        self.buffer[self.len] = c as u8;
                        self.len += 1;
                        print!("{}", c);
                    }
                }
                _ => {}
            }
        }
        core::str::from_utf8(&self.buffer[..self.len]).unwrap_or("")
    }
}

/// Split a command line into the command word and its argument string.
/// Returns `None` for blank lines.
pub fn parse_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match line.split_once(char::is_whitespace) {
        Some((name, args)) => Some((name, args.trim())),
        None => Some((line, "")),
    }
}

/// Look up and run one command line.
pub fn execute(line: &str) {
    let Some((name, args)) = parse_line(line) else {
        return;
    };
    match commands::find(name) {
        Some(command) => (command.run)(args),
        None => {
            vga::set_color(Color::LightRed, Color::Black);
            print!("Unknown command: ");
            vga::set_color(Color::White, Color::Black);
            println!("{}", name);
            println!("Type 'help' for available commands.");
        }
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn lines_split_into_command_and_args() {
        assert_eq!(parse_line("help"), Some(("help", "")));
        assert_eq!(parse_line("echo hello world"), Some(("echo", "hello world")));
        assert_eq!(parse_line("  color  red  black "), Some(("color", "red  black")));
        assert_eq!(parse_line("   "), None);
        assert_eq!(parse_line(""), None);
    }

    #[test]
    fn every_command_resolves_by_name() {
        for command in commands::COMMANDS.iter() {
            let found = commands::find(command.name).expect(command.name);
            assert_eq!(found.name, command.name);
        }
        assert!(commands::find("frobnicate").is_none());
    }

    #[test]
    fn command_names_are_unique() {
        for (i, a) in commands::COMMANDS.iter().enumerate() {
            for b in commands::COMMANDS.iter().skip(i + 1) {
                assert_ne!(a.name, b.name);
            }
        }
    }
}
