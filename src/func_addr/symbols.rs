use super::SoToken;
use crate::warnings::RuntimeWarning;

use indexmap::IndexMap;

use std::process::Command;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolInfo {
    /// The symbol as found in the object, usually mangled.
    pub name: String,
    pub demangled: Option<String>,
    pub file: Option<String>,
    pub line: u32,
}

impl SymbolInfo {
    pub fn demangled_name(&self) -> &str {
        self.demangled.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddress {
    pub so_token: SoToken,
    pub symbol: Option<SymbolInfo>,
}

/// Maps code addresses to symbols.
pub trait SymbolResolver: Send + Sync {
    fn lookup_addr(&self, address: usize) -> ResolvedAddress;
}

/// Function symbols of the executable and loaded shared objects, in the
/// order they were read.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: IndexMap<usize, (SoToken, SymbolInfo)>,
}

/// One line of `nm -l` output: `address type name[\tfile:line]`.
fn parse_nm_line(line: &str) -> Option<(usize, SymbolInfo)> {
    let (symbol, location) = match line.split_once('\t') {
        Some((symbol, location)) => (symbol, Some(location.trim())),
        None => (line, None),
    };
    let mut fields = symbol.trim_start().splitn(3, ' ');
    let address = usize::from_str_radix(fields.next()?, 16).ok()?;
    let kind = fields.next()?;
    if !matches!(kind, "T" | "t" | "W" | "w") {
        return None;
    }
    let name = fields.next()?.trim_end();
    if name.is_empty() {
        return None;
    }
    let (file, line) = match location.and_then(|l| l.rsplit_once(':')) {
        Some((file, line)) => (Some(file.to_string()), line.parse().unwrap_or(0)),
        None => (None, 0),
    };
    Some((
        address,
        SymbolInfo {
            name: name.to_string(),
            demangled: None,
            file,
            line,
        },
    ))
}

fn run_nm(args: &[&str], object: &str) -> Result<String, String> {
    let output = Command::new("nm")
        .args(args)
        .arg(object)
        .output()
        .map_err(|e| e.to_string())?;
    if !output.status.success() {
        return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable::default()
    }

    /// Symbols of the executable (token 0) from `nm -l` output.
    pub fn from_nm_output(text: &str) -> SymbolTable {
        let mut table = SymbolTable::new();
        table.insert_nm_output(0, text);
        table
    }

    /// Adds the function symbols listed in `text`. Returns how many were
    /// added; lines that are not defined function symbols are skipped.
    pub fn insert_nm_output(&mut self, so_token: SoToken, text: &str) -> usize {
        let before = self.symbols.len();
        for (address, symbol) in text.lines().filter_map(parse_nm_line) {
            self.symbols.insert(address, (so_token, symbol));
        }
        self.symbols.len() - before
    }

    /// Reads the symbols of `object` (default: the running executable) with
    /// `nm`. An object without a readable symbol table yields an empty
    /// table and a runtime warning.
    pub fn for_executable(object: Option<&str>) -> SymbolTable {
        let object = match object {
            Some(object) => object.to_string(),
            None => match std::env::current_exe() {
                Ok(exe) => exe.display().to_string(),
                Err(e) => {
                    RuntimeWarning::SymbolTable("/proc/self/exe", &e.to_string()).print();
                    return SymbolTable::new();
                }
            },
        };
        let mut table = SymbolTable::new();
        match run_nm(&["-l"], &object) {
            Ok(text) => {
                table.insert_nm_output(0, &text);
            }
            Err(reason) => {
                RuntimeWarning::SymbolTable(&object, &reason).print();
                return table;
            }
        }
        if let Ok(text) = run_nm(&["-C"], &object) {
            for (address, symbol) in text.lines().filter_map(parse_nm_line) {
                table.set_demangled(address, &symbol.name);
            }
        }
        tracing::debug!("{} function symbol(s) read from {}", table.len(), object);
        table
    }

    /// Records the demangled name of the symbol at `address`, if it differs
    /// from the symbol's name.
    pub fn set_demangled(&mut self, address: usize, demangled: &str) {
        if let Some((_, symbol)) = self.symbols.get_mut(&address) {
            if symbol.name != demangled {
                symbol.demangled = Some(demangled.to_string());
            }
        }
    }

    /// Forgets the symbols of an unloaded shared object.
    pub fn remove_object(&mut self, so_token: SoToken) -> usize {
        let before = self.symbols.len();
        self.symbols.retain(|_, (token, _)| *token != so_token);
        before - self.symbols.len()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, SoToken, &SymbolInfo)> {
        self.symbols
            .iter()
            .map(|(address, (token, symbol))| (*address, *token, symbol))
    }
}

impl SymbolResolver for SymbolTable {
    fn lookup_addr(&self, address: usize) -> ResolvedAddress {
        match self.symbols.get(&address) {
            Some((so_token, symbol)) => ResolvedAddress {
                so_token: *so_token,
                symbol: Some(symbol.clone()),
            },
            None => ResolvedAddress {
                so_token: 0,
                symbol: None,
            },
        }
    }
}

impl<F> SymbolResolver for F
where
    F: Fn(usize) -> ResolvedAddress + Send + Sync,
{
    fn lookup_addr(&self, address: usize) -> ResolvedAddress {
        self(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nm_lines() {
        let table = SymbolTable::from_nm_output(
            "0000000000401126 T main\t/home/user/app/main.c:12\n\
             0000000000401000 t _init\n\
             0000000000404028 B counter\t/home/user/app/main.c:3\n\
             0000000000401200 W weak_fn\tC:/odd/path.c:7\n\
                              U malloc\n\
             garbage\n",
        );
        assert_eq!(table.len(), 3);
        let main = table.lookup_addr(0x401126).symbol.unwrap();
        assert_eq!(main.name, "main");
        assert_eq!(main.file.as_deref(), Some("/home/user/app/main.c"));
        assert_eq!(main.line, 12);
        let init = table.lookup_addr(0x401000).symbol.unwrap();
        assert_eq!(init.file, None);
        assert_eq!(init.line, 0);
        let weak = table.lookup_addr(0x401200).symbol.unwrap();
        assert_eq!(weak.file.as_deref(), Some("C:/odd/path.c"));
        assert!(table.lookup_addr(0x404028).symbol.is_none());
    }

    #[test]
    fn demangled_names_with_spaces() {
        let mut table = SymbolTable::from_nm_output("0000000000001000 T _ZN2ns3fooEi\t/a.cpp:4\n");
        let demangled = SymbolTable::from_nm_output("0000000000001000 T ns::foo(int)\t/a.cpp:4\n");
        for (address, _, symbol) in demangled.iter() {
            table.set_demangled(address, &symbol.name);
        }
        let symbol = table.lookup_addr(0x1000).symbol.unwrap();
        assert_eq!(symbol.name, "_ZN2ns3fooEi");
        assert_eq!(symbol.demangled_name(), "ns::foo(int)");
    }

    #[test]
    fn objects_can_be_removed() {
        let mut table = SymbolTable::from_nm_output("0000000000001000 T main\n");
        assert_eq!(table.insert_nm_output(2, "0000000000002000 T a\n0000000000002100 T b\n"), 2);
        assert_eq!(table.lookup_addr(0x2100).so_token, 2);
        assert_eq!(table.remove_object(2), 2);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn unreadable_executable_gives_empty_table() {
        assert!(SymbolTable::for_executable(Some("/nonexistent/binary")).is_empty());
    }
}
