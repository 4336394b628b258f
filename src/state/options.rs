/// User options and their binary persistence

use std::error::Error;
use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{info, LevelFilter};

use crate::debugger::Color;

/// Default name of the options file.
pub const OPTIONS_FILE: &str = "Ponce.cfg";
pub const MAX_PATH: usize = 260;

const BOOL_FIELDS: usize = 14;
/// Size of the persisted record; files of any other size are rejected.
pub const ENCODED_SIZE: usize = 3 * 8 + 3 * 4 + BOOL_FIELDS + MAX_PATH;

#[derive(Debug)]
pub enum OptionsError {
    Io(io::Error),
    SizeMismatch { expected: usize, found: usize },
    PathTooLong(usize),
}

impl Error for OptionsError {}

impl fmt::Display for OptionsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionsError::Io(e) => write!(f, "I/O error on the options file: {}", e),
            OptionsError::SizeMismatch { expected, found } => {
                write!(f, "Options file has {} bytes, expected {}", found, expected)
            }
            OptionsError::PathTooLong(len) => write!(f, "Blacklist path too long ({} bytes, max {})", len, MAX_PATH - 1),
        }
    }
}

impl From<io::Error> for OptionsError {
    fn from(e: io::Error) -> Self {
        OptionsError::Io(e)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub limit_instructions_tracing_mode: u64,
    pub limit_time: u64, // seconds
    pub solver_timeout: u64, // seconds
    pub already_configured: bool,
    // Only one of the two engines is used at a time
    pub use_tainting_engine: bool,
    pub use_symbolic_engine: bool,
    pub color_tainted: Color,
    pub color_tainted_condition: Color,
    pub color_executed_instruction: Color,
    pub show_debug_info: bool,
    pub show_extra_debug_info: bool,
    pub ast_optimizations: bool,
    pub concretize_undefined_registers: bool,
    pub constant_folding: bool,
    pub symbolize_index_rotation: bool,
    pub taint_through_pointers: bool,
    pub add_comments_controlled_operands: bool,
    pub rename_tainted_function_names: bool,
    pub add_comments_symbolic_expressions: bool,
    pub paint_executed_instructions: bool,
    pub blacklist_path: String,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            limit_instructions_tracing_mode: 10000,
            limit_time: 60,
            solver_timeout: 10,
            already_configured: false,
            use_tainting_engine: false,
            use_symbolic_engine: true,
            color_tainted: 0x99FFCE,
            color_tainted_condition: 0x00b377,
            color_executed_instruction: 0xe6e6e6,
            show_debug_info: false,
            show_extra_debug_info: false,
            ast_optimizations: false,
            concretize_undefined_registers: false,
            constant_folding: false,
            symbolize_index_rotation: false,
            taint_through_pointers: false,
            add_comments_controlled_operands: false,
            rename_tainted_function_names: false,
            add_comments_symbolic_expressions: false,
            paint_executed_instructions: false,
            blacklist_path: String::new(),
        }
    }
}

impl Options {
    pub fn log_level(&self) -> LevelFilter {
        if self.show_extra_debug_info {
            LevelFilter::Trace
        } else if self.show_debug_info {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        }
    }

    fn bools(&self) -> [bool; BOOL_FIELDS] {
        [
            self.already_configured,
            self.use_tainting_engine,
            self.use_symbolic_engine,
            self.show_debug_info,
            self.show_extra_debug_info,
            self.ast_optimizations,
            self.concretize_undefined_registers,
            self.constant_folding,
            self.symbolize_index_rotation,
            self.taint_through_pointers,
            self.add_comments_controlled_operands,
            self.rename_tainted_function_names,
            self.add_comments_symbolic_expressions,
            self.paint_executed_instructions,
        ]
    }

    fn set_bools(&mut self, values: [bool; BOOL_FIELDS]) {
        let [already_configured, use_tainting_engine, use_symbolic_engine, show_debug_info, show_extra_debug_info,
            ast_optimizations, concretize_undefined_registers, constant_folding, symbolize_index_rotation,
            taint_through_pointers, add_comments_controlled_operands, rename_tainted_function_names,
            add_comments_symbolic_expressions, paint_executed_instructions] = values;
        self.already_configured = already_configured;
        self.use_tainting_engine = use_tainting_engine;
        self.use_symbolic_engine = use_symbolic_engine;
        self.show_debug_info = show_debug_info;
        self.show_extra_debug_info = show_extra_debug_info;
        self.ast_optimizations = ast_optimizations;
        self.concretize_undefined_registers = concretize_undefined_registers;
        self.constant_folding = constant_folding;
        self.symbolize_index_rotation = symbolize_index_rotation;
        self.taint_through_pointers = taint_through_pointers;
        self.add_comments_controlled_operands = add_comments_controlled_operands;
        self.rename_tainted_function_names = rename_tainted_function_names;
        self.add_comments_symbolic_expressions = add_comments_symbolic_expressions;
        self.paint_executed_instructions = paint_executed_instructions;
    }

    /// Fixed-size little-endian record.
    pub fn to_bytes(&self) -> Result<Vec<u8>, OptionsError> {
        let path = self.blacklist_path.as_bytes();
        if path.len() >= MAX_PATH {
            return Err(OptionsError::PathTooLong(path.len()));
        }
        let mut out = Vec::with_capacity(ENCODED_SIZE);
        out.write_u64::<LittleEndian>(self.limit_instructions_tracing_mode)?;
        out.write_u64::<LittleEndian>(self.limit_time)?;
        out.write_u64::<LittleEndian>(self.solver_timeout)?;
        out.write_u32::<LittleEndian>(self.color_tainted)?;
        out.write_u32::<LittleEndian>(self.color_tainted_condition)?;
        out.write_u32::<LittleEndian>(self.color_executed_instruction)?;
        for value in self.bools() {
            out.write_u8(value as u8)?;
        }
        let mut path_field = [0u8; MAX_PATH];
        path_field[..path.len()].copy_from_slice(path);
        out.write_all(&path_field)?;
        Ok(out)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Options, OptionsError> {
        if data.len() != ENCODED_SIZE {
            return Err(OptionsError::SizeMismatch { expected: ENCODED_SIZE, found: data.len() });
        }
        let mut reader = Cursor::new(data);
        let mut options = Options {
            limit_instructions_tracing_mode: reader.read_u64::<LittleEndian>()?,
            limit_time: reader.read_u64::<LittleEndian>()?,
            solver_timeout: reader.read_u64::<LittleEndian>()?,
            color_tainted: reader.read_u32::<LittleEndian>()?,
            color_tainted_condition: reader.read_u32::<LittleEndian>()?,
            color_executed_instruction: reader.read_u32::<LittleEndian>()?,
            ..Options::default()
        };
        let mut bools = [false; BOOL_FIELDS];
        for value in bools.iter_mut() {
            *value = reader.read_u8()? != 0;
        }
        options.set_bools(bools);
        let mut path_field = [0u8; MAX_PATH];
        reader.read_exact(&mut path_field)?;
        let end = path_field.iter().position(|b| *b == 0).unwrap_or(MAX_PATH);
        options.blacklist_path = String::from_utf8_lossy(&path_field[..end]).into_owned();
        Ok(options)
    }
}

/// Loads the options file; `Ok(None)` when it does not exist.
pub fn load_options(path: &Path) -> Result<Option<Options>, OptionsError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("No options file at {}, using defaults", path.display());
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;
    let options = Options::from_bytes(&data)?;
    info!("Options loaded from {}", path.display());
    Ok(Some(options))
}

pub fn save_options(path: &Path, options: &Options) -> Result<(), OptionsError> {
    let data = options.to_bytes()?;
    let mut file = File::create(path)?;
    file.write_all(&data)?;
    info!("Options saved to {}", path.display());
    Ok(())
}
