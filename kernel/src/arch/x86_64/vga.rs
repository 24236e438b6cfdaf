//! VGA text-mode console.
//!
//! 80x25 character buffer at physical 0xB8000, reached through the
//! identity mapping established by the bootloader. The writer tracks a
//! row/column cursor, scrolls on overflow, understands backspace for the
//! shell's line editor, and mirrors its position into the hardware cursor
//! through the CRT controller ports.

use core::{fmt, ptr::write_volatile};

use lazy_static::lazy_static;
use spin::Mutex;

/// VGA text-mode color palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Color {
    Black = 0,
    Blue = 1,
    Green = 2,
    Cyan = 3,
    Red = 4,
    Magenta = 5,
    Brown = 6,
    LightGray = 7,
    DarkGray = 8,
    LightBlue = 9,
    LightGreen = 10,
    LightCyan = 11,
    LightRed = 12,
    Pink = 13,
    Yellow = 14,
    White = 15,
}

impl Color {
    /// Parse a palette name as typed into the `color` shell command.
    pub fn from_name(name: &str) -> Option<Color> {
        Some(match name {
            "black" => Color::Black,
            "blue" => Color::Blue,
            "green" => Color::Green,
            "cyan" => Color::Cyan,
            "red" => Color::Red,
            "magenta" => Color::Magenta,
            "brown" => Color::Brown,
            "gray" | "lightgray" => Color::LightGray,
            "darkgray" => Color::DarkGray,
            "lightblue" => Color::LightBlue,
            "lightgreen" => Color::LightGreen,
            "lightcyan" => Color::LightCyan,
            "lightred" => Color::LightRed,
            "pink" => Color::Pink,
            "yellow" => Color::Yellow,
            "white" => Color::White,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
struct ColorCode(u8);

impl ColorCode {
    const fn new(foreground: Color, background: Color) -> ColorCode {
        ColorCode(((background as u8) << 4) | (foreground as u8))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
struct ScreenChar {
    ascii_character: u8,
    color_code: ColorCode,
}

const BUFFER_HEIGHT: usize = 25;
const BUFFER_WIDTH: usize = 80;

/// CRT controller index/data ports used for the hardware cursor.
const CRTC_INDEX: u16 = 0x3D4;
const CRTC_DATA: u16 = 0x3D5;

#[repr(transparent)]
struct Buffer {
    chars: [[ScreenChar; BUFFER_WIDTH]; BUFFER_HEIGHT],
}

pub struct Writer {
    row: usize,
    column: usize,
    color_code: ColorCode,
    buffer: &'static mut Buffer,
}

impl Writer {
    pub fn write_byte(&mut self, byte: u8) {
        match byte {
            b'\n' => self.new_line(),
            0x08 => self.backspace(),
            byte => {
                if self.column >= BUFFER_WIDTH {
                    self.new_line();
                }
                let row = self.row;
                let col = self.column;
                let color_code = self.color_code;
                // SAFETY: The VGA buffer at 0xB8000 is memory-mapped I/O;
                // write_volatile keeps the store from being elided. Both
                // indices are kept in range by new_line above.
                unsafe {
                    write_volatile(
                        &mut self.buffer.chars[row][col],
                        ScreenChar {
                            ascii_character: byte,
                            color_code,
                        },
                    );
                }
                self.column += 1;
            }
        }
    }

    /// Erase the character before the cursor (shell line editing).
    fn backspace(&mut self) {
        if self.column == 0 {
            return;
        }
        self.column -= 1;
        let blank = ScreenChar {
            ascii_character: b' ',
            color_code: self.color_code,
        };
        // SAFETY: column was just decremented from a valid position, so
        // both indices are in range. Volatile store to MMIO.
        unsafe {
            write_volatile(&mut self.buffer.chars[self.row][self.column], blank);
        }
    }

    fn new_line(&mut self) {
        self.column = 0;
        if self.row + 1 < BUFFER_HEIGHT {
            self.row += 1;
            return;
        }
        for row in 1..BUFFER_HEIGHT {
            for col in 0..BUFFER_WIDTH {
                // SAFETY: volatile copy within the VGA buffer; row ranges
                // over 1..25 so row-1 is always a valid index.
                let character = unsafe { core::ptr::read_volatile(&self.buffer.chars[row][col]) };
                unsafe {
                    write_volatile(&mut self.buffer.chars[row - 1][col], character);
                }
            }
        }
        self.clear_row(BUFFER_HEIGHT - 1);
    }

    fn clear_row(&mut self, row: usize) {
        let blank = ScreenChar {
            ascii_character: b' ',
            color_code: self.color_code,
        };
        for col in 0..BUFFER_WIDTH {
            // SAFETY: row is passed by internal callers and always within
            // BUFFER_HEIGHT; col is bounded by the loop.
            unsafe {
                write_volatile(&mut self.buffer.chars[row][col], blank);
            }
        }
    }

    pub fn write_string(&mut self, s: &str) {
        for byte in s.bytes() {
            match byte {
                0x20..=0x7e | b'\n' | 0x08 => self.write_byte(byte),
                _ => self.write_byte(0xfe),
            }
        }
    }

    /// Blank the whole screen and home the cursor.
    pub fn clear(&mut self) {
        for row in 0..BUFFER_HEIGHT {
            self.clear_row(row);
        }
        self.row = 0;
        self.column = 0;
    }

    pub fn set_color(&mut self, foreground: Color, background: Color) {
        self.color_code = ColorCode::new(foreground, background);
    }

    /// Program the CRT controller so the blinking hardware cursor follows
    /// the writer position.
    fn update_cursor(&self) {
        let pos = (self.row * BUFFER_WIDTH + self.column) as u16;
        use x86_64::instructions::port::Port;
        let mut index: Port<u8> = Port::new(CRTC_INDEX);
        let mut data: Port<u8> = Port::new(CRTC_DATA);
        // SAFETY: 0x3D4/0x3D5 are the standard CRT controller ports;
        // registers 0x0E/0x0F hold the cursor location high/low bytes.
        unsafe {
            index.write(0x0F);
            data.write((pos & 0xFF) as u8);
            index.write(0x0E);
            data.write((pos >> 8) as u8);
        }
    }
}

impl fmt::Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_string(s);
        Ok(())
    }
}

lazy_static! {
    pub static ref WRITER: Mutex<Writer> = Mutex::new(Writer {
        row: 0,
        column: 0,
        color_code: ColorCode::new(Color::White, Color::Black),
        // SAFETY: 0xB8000 is the well-known physical address of the VGA
        // text buffer, identity-mapped by the bootloader. The &'static mut
        // is sound because the buffer outlives the kernel and all access
        // goes through the enclosing Mutex.
        buffer: unsafe { &mut *(0xb8000 as *mut Buffer) },
    });
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;

    use x86_64::instructions::interrupts;

    interrupts::without_interrupts(|| {
        let mut writer = WRITER.lock();
        writer.write_fmt(args).expect("VGA write_fmt failed");
        writer.update_cursor();
    });
}

/// Clear the screen (boot and the `clear` command).
pub fn clear_screen() {
    use x86_64::instructions::interrupts;

    interrupts::without_interrupts(|| {
        let mut writer = WRITER.lock();
        writer.clear();
        writer.update_cursor();
    });
}

/// Change the active text attribute.
pub fn set_color(foreground: Color, background: Color) {
    use x86_64::instructions::interrupts;

    interrupts::without_interrupts(|| {
        WRITER.lock().set_color(foreground, background);
    });
}

/// Write raw bytes to the console; used by the `write` syscall where the
/// buffer comes from ring 3 and need not be UTF-8.
pub fn write_bytes(bytes: &[u8]) {
    use x86_64::instructions::interrupts;

    interrupts::without_interrupts(|| {
        let mut writer = WRITER.lock();
        for &byte in bytes {
            match byte {
                0x20..=0x7e | b'\n' | 0x08 => writer.write_byte(byte),
                _ => writer.write_byte(0xfe),
            }
        }
        writer.update_cursor();
    });
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn color_code_packs_background_high() {
        let code = ColorCode::new(Color::White, Color::Red);
        assert_eq!(code.0, (4 << 4) | 15);
    }

    #[test]
    fn color_names_resolve() {
        assert_eq!(Color::from_name("lightcyan"), Some(Color::LightCyan));
        assert_eq!(Color::from_name("gray"), Some(Color::LightGray));
        assert_eq!(Color::from_name("mauve"), None);
    }
}
