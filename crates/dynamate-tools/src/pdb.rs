//! Text-level transformations of PDB files.
//!
//! Everything here works on fixed-column PDB records and never touches the
//! filesystem, so the tool wrappers stay thin and the transformations are testable.

use std::collections::HashMap;
use std::fmt;

use rand::Rng;

/// Bond length used when placing cap atoms, in Ångström.
const CAP_BOND: f64 = 1.36;

const ELEMENTS: &[&str] = &[
    "H", "He", "Li", "Be", "B", "C", "N", "O", "F", "Ne", "Na", "Mg", "Al", "Si", "P", "S",
    "Cl", "Ar", "K", "Ca", "Sc", "Ti", "V", "Cr", "Mn", "Fe", "Co", "Ni", "Cu", "Zn", "Ga",
    "Ge", "As", "Se", "Br", "Kr", "Rb", "Sr", "Y", "Zr", "Nb", "Mo", "Tc", "Ru", "Rh", "Pd",
    "Ag", "Cd", "In", "Sn", "Sb", "Te", "I", "Xe", "Cs", "Ba", "La", "Ce", "Pr", "Nd", "Pm",
    "Sm", "Eu", "Gd", "Tb", "Dy", "Ho", "Er", "Tm", "Yb", "Lu", "Hf", "Ta", "W", "Re", "Os",
    "Ir", "Pt", "Au", "Hg", "Tl", "Pb", "Bi", "Po", "At", "Rn", "Fr", "Ra", "U", "Pu",
];

// --- Column access ---

fn field(line: &str, start: usize, end: usize) -> &str {
    line.get(start..end.min(line.len())).unwrap_or("")
}

/// Record name (columns 1-6), trimmed.
pub fn record(line: &str) -> &str {
    field(line, 0, 6).trim()
}

pub fn is_atom(line: &str) -> bool {
    matches!(record(line), "ATOM" | "HETATM")
}

pub fn residue_name(line: &str) -> &str {
    field(line, 17, 20).trim()
}

fn atom_name(line: &str) -> &str {
    field(line, 12, 16).trim()
}

fn chain_id(line: &str) -> char {
    field(line, 21, 22).chars().next().unwrap_or(' ')
}

/// Residue sequence number plus insertion code (columns 23-27).
fn residue_seq(line: &str) -> &str {
    field(line, 22, 27)
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push('\n');
}

/// Residue identity within a structure.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResidueKey {
    pub chain: char,
    pub seq: String,
}

impl ResidueKey {
    fn of(line: &str) -> Self {
        Self {
            chain: chain_id(line),
            seq: residue_seq(line).trim().to_string(),
        }
    }
}

impl fmt::Display for ResidueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain, self.seq)
    }
}

// --- Cleaning and ligand extraction ---

/// Drop HETATM, CONECT and MASTER records.
pub fn strip_hetero(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        if !matches!(record(line), "HETATM" | "CONECT" | "MASTER") {
            push_line(&mut out, line);
        }
    }
    out
}

/// Where a ligand residue appears in a structure.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LigandScan {
    /// Distinct copies in order of appearance.
    pub copies: Vec<ResidueKey>,
    /// The ligand is named in a LINK record (covalently bound).
    pub covalent: bool,
}

impl LigandScan {
    pub fn present(&self) -> bool {
        !self.copies.is_empty()
    }
}

pub fn scan_ligand(text: &str, code: &str) -> LigandScan {
    let mut scan = LigandScan::default();
    for line in text.lines() {
        match record(line) {
            "HETATM" if residue_name(line) == code => {
                let key = ResidueKey::of(line);
                if !scan.copies.contains(&key) {
                    scan.copies.push(key);
                }
            }
            "LINK" => {
                if field(line, 17, 20).trim() == code || field(line, 47, 50).trim() == code {
                    scan.covalent = true;
                }
            }
            _ => {}
        }
    }
    scan
}

/// HETATM records of the first copy of `code`, terminated by END.
pub fn extract_first_ligand(text: &str, code: &str) -> Option<String> {
    let scan = scan_ligand(text, code);
    let first = scan.copies.first()?;
    let mut out = String::new();
    for line in text.lines() {
        if record(line) == "HETATM" && residue_name(line) == code && &ResidueKey::of(line) == first {
            push_line(&mut out, line);
        }
    }
    out.push_str("END\n");
    Some(out)
}

fn normalize_element(raw: &str) -> String {
    let mut chars = raw.trim().chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase(),
        None => String::new(),
    }
}

/// Result of cleaning an obabel-protonated ligand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CleanedLigand {
    pub text: String,
    pub renamed_atoms: usize,
    /// Lines left unchanged because their element column was not recognised.
    pub unknown_elements: Vec<String>,
}

/// Drop CONECT/MASTER, give generic residue names the ligand code, and rename atoms
/// per element (`C1`, `C2`, `N1`, ...).
pub fn clean_protonated_ligand(text: &str, code: &str) -> CleanedLigand {
    let mut counters: HashMap<String, usize> = HashMap::new();
    let mut out = String::with_capacity(text.len());
    let mut renamed_atoms = 0;
    let mut unknown_elements = Vec::new();

    for line in text.lines() {
        if matches!(record(line), "CONECT" | "MASTER") {
            continue;
        }
        let line = line.replace("UNL", code).replace("UNK", code);
        if !is_atom(&line) {
            push_line(&mut out, &line);
            continue;
        }

        let element = normalize_element(field(&line, 76, 78));
        if !ELEMENTS.contains(&element.as_str()) || line.len() < 16 {
            unknown_elements.push(element);
            push_line(&mut out, &line);
            continue;
        }

        let count = counters.entry(element.clone()).or_insert(0);
        *count += 1;
        let new_name = format!("{element}{count}");
        out.push_str(&line[..12]);
        out.push_str(&format!("{new_name:>4}"));
        out.push_str(&line[16..]);
        out.push('\n');
        renamed_atoms += 1;
    }

    CleanedLigand {
        text: out,
        renamed_atoms,
        unknown_elements,
    }
}

/// Protein records (minus END) followed by the ligand's HETATM records.
pub fn merge_complex(protein: &str, ligand: &str) -> String {
    let mut out = String::with_capacity(protein.len() + ligand.len());
    for line in protein.lines() {
        if !line.starts_with("END") {
            push_line(&mut out, line);
        }
    }
    for line in ligand.lines() {
        if record(line) == "HETATM" {
            push_line(&mut out, line);
        }
    }
    out.push_str("TER\nEND\n");
    out
}

// --- Histidine protonation names ---

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistidineRename {
    pub residue: ResidueKey,
    pub new_name: &'static str,
}

/// Rename HIS residues from their hydrogens: HD1 only -> HID, HE2 only -> HIE,
/// both -> HIP. Residues with neither stay HIS.
pub fn rename_histidines(text: &str) -> (String, Vec<HistidineRename>) {
    let lines: Vec<&str> = text.lines().collect();
    let mut residues: Vec<(ResidueKey, Vec<usize>)> = Vec::new();
    let mut index: HashMap<ResidueKey, usize> = HashMap::new();

    for (i, line) in lines.iter().enumerate() {
        if !is_atom(line) {
            continue;
        }
        let key = ResidueKey {
            chain: chain_id(line),
            seq: field(line, 22, 26).trim().to_string(),
        };
        let slot = *index.entry(key.clone()).or_insert_with(|| {
            residues.push((key, Vec::new()));
            residues.len() - 1
        });
        residues[slot].1.push(i);
    }

    let mut new_names: HashMap<usize, &'static str> = HashMap::new();
    let mut renames = Vec::new();
    for (key, members) in &residues {
        if residue_name(lines[members[0]]) != "HIS" {
            continue;
        }
        let has = |name: &str| members.iter().any(|&i| atom_name(lines[i]) == name);
        let new_name = match (has("HD1"), has("HE2")) {
            (true, false) => "HID",
            (false, true) => "HIE",
            (true, true) => "HIP",
            (false, false) => continue,
        };
        for &i in members {
            new_names.insert(i, new_name);
        }
        renames.push(HistidineRename {
            residue: key.clone(),
            new_name,
        });
    }

    let mut out = String::with_capacity(text.len());
    for (i, line) in lines.iter().enumerate() {
        match new_names.get(&i) {
            Some(name) if line.len() >= 20 => {
                out.push_str(&line[..17]);
                out.push_str(name);
                out.push_str(&line[20..]);
                out.push('\n');
            }
            _ => push_line(&mut out, line),
        }
    }
    (out, renames)
}

// --- Terminal caps ---

#[derive(Clone, Copy, Debug, PartialEq)]
struct Vec3 {
    x: f64,
    y: f64,
    z: f64,
}

impl Vec3 {
    fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    fn add(self, o: Self) -> Self {
        Self::new(self.x + o.x, self.y + o.y, self.z + o.z)
    }

    fn sub(self, o: Self) -> Self {
        Self::new(self.x - o.x, self.y - o.y, self.z - o.z)
    }

    fn scale(self, k: f64) -> Self {
        Self::new(self.x * k, self.y * k, self.z * k)
    }

    fn cross(self, o: Self) -> Self {
        Self::new(
            self.y * o.z - self.z * o.y,
            self.z * o.x - self.x * o.z,
            self.x * o.y - self.y * o.x,
        )
    }

    fn norm(self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    fn unit(self) -> Option<Self> {
        let n = self.norm();
        (n > 1e-9).then(|| self.scale(1.0 / n))
    }
}

#[derive(Clone, Debug)]
struct Atom {
    name: String,
    resname: String,
    chain: char,
    res_key: String,
    pos: Vec3,
    occupancy: f64,
    bfactor: f64,
    element: String,
}

impl Atom {
    fn parse(line: &str) -> Option<Self> {
        let coord = |a, b| field(line, a, b).trim().parse::<f64>().ok();
        let name = atom_name(line).to_string();
        let element = match field(line, 76, 78).trim() {
            "" => name.chars().find(|c| c.is_ascii_alphabetic())?.to_string(),
            e => e.to_string(),
        };
        Some(Self {
            resname: residue_name(line).to_string(),
            chain: chain_id(line),
            res_key: residue_seq(line).to_string(),
            pos: Vec3::new(coord(30, 38)?, coord(38, 46)?, coord(46, 54)?),
            occupancy: coord(54, 60).unwrap_or(1.0),
            bfactor: coord(60, 66).unwrap_or(0.0),
            name,
            element,
        })
    }

    fn cap(name: &str, resname: &str, chain: char, pos: Vec3) -> Self {
        Self {
            name: name.to_string(),
            resname: resname.to_string(),
            chain,
            res_key: String::new(),
            pos,
            occupancy: 1.0,
            bfactor: 0.0,
            element: name[..1].to_string(),
        }
    }

    fn to_line(&self, serial: usize, resseq: usize) -> String {
        let name = if self.name.len() >= 4 {
            self.name[..4].to_string()
        } else if self.element.len() == 1 {
            format!(" {:<3}", self.name)
        } else {
            format!("{:<4}", self.name)
        };
        format!(
            "ATOM  {serial:>5} {name} {resname:>3} {chain}{resseq:>4}    {x:>8.3}{y:>8.3}{z:>8.3}{occ:>6.2}{b:>6.2}          {el:>2}",
            resname = self.resname,
            chain = self.chain,
            x = self.pos.x,
            y = self.pos.y,
            z = self.pos.z,
            occ = self.occupancy,
            b = self.bfactor,
            el = self.element,
        )
    }
}

struct Residue {
    atoms: Vec<Atom>,
}

impl Residue {
    fn position(&self, name: &str) -> Option<Vec3> {
        self.atoms.iter().find(|a| a.name == name).map(|a| a.pos)
    }

    fn label(&self) -> String {
        let first = &self.atoms[0];
        format!("{}{}", first.resname, first.res_key.trim())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CapError {
    HeteroRecords,
    NoAtoms,
    UnreadableAtom(String),
    MissingAtom {
        chain: char,
        residue: String,
        atom: &'static str,
    },
    Degenerate {
        chain: char,
        residue: String,
    },
}

impl fmt::Display for CapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapError::HeteroRecords => f.write_str(
                "Error: Input PDB file contains HETATM, CONECT or MASTER lines. Please prepare the PDB file \
                 first to remove these lines. If the PDB file has already been prepared with the \
                 prepare_pdb_file_ligand tool, use the correct parameters when calling this tool or check \
                 that it has been prepared correctly.",
            ),
            CapError::NoAtoms => f.write_str("Error: Input PDB file contains no ATOM records to cap."),
            CapError::UnreadableAtom(line) => write!(f, "Error: Could not read coordinates from line: {line}"),
            CapError::MissingAtom { chain, residue, atom } => write!(
                f,
                "Error: Cannot cap chain {chain}: residue {residue} has no {atom} atom. Consider fix_pdb_file first."
            ),
            CapError::Degenerate { chain, residue } => write!(
                f,
                "Error: Cannot cap chain {chain}: overlapping atoms in terminal residue {residue}."
            ),
        }
    }
}

/// Capped structure text plus what was done.
#[derive(Clone, Debug, PartialEq)]
pub struct CappedStructure {
    pub text: String,
    pub chains: usize,
    pub residues: usize,
}

/// ACE carbonyl C, methyl C and O. The methyl and oxygen sit on an equilateral
/// triangle around the carbonyl carbon in an arbitrary plane.
fn ace_positions(first: &Residue, chain: char, rng: &mut impl Rng) -> Result<[Vec3; 3], CapError> {
    let missing = |atom| CapError::MissingAtom {
        chain,
        residue: first.label(),
        atom,
    };
    let degenerate = || CapError::Degenerate {
        chain,
        residue: first.label(),
    };
    let n = first.position("N").ok_or_else(|| missing("N"))?;
    let ca = first.position("CA").ok_or_else(|| missing("CA"))?;

    let c1 = n.add(n.sub(ca).unit().ok_or_else(degenerate)?.scale(CAP_BOND));

    let mut orientation = Vec3::new(0.0, 0.0, 0.0);
    while orientation.norm() < 1e-6 {
        orientation = Vec3::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        );
    }
    let normal = orientation.unit().ok_or_else(degenerate)?;

    let to_ca = ca.sub(c1);
    let base = c1.sub(to_ca.scale(0.5));
    let offset = normal.cross(to_ca).scale(3.0_f64.sqrt() / 2.0);
    let ch3 = base.add(offset);
    let o = base.sub(offset);

    let place = |p: Vec3| p.sub(c1).unit().map(|u| c1.add(u.scale(CAP_BOND)));
    Ok([c1, place(ch3).ok_or_else(degenerate)?, place(o).ok_or_else(degenerate)?])
}

/// NME N and C, continuing the backbone from OXT when present, otherwise away from
/// the O/CA midpoint.
fn nme_positions(last: &Residue, chain: char) -> Result<[Vec3; 2], CapError> {
    let missing = |atom| CapError::MissingAtom {
        chain,
        residue: last.label(),
        atom,
    };
    let degenerate = || CapError::Degenerate {
        chain,
        residue: last.label(),
    };
    let c = last.position("C").ok_or_else(|| missing("C"))?;

    if let Some(oxt) = last.position("OXT") {
        let dir = oxt.sub(c).unit().ok_or_else(degenerate)?;
        return Ok([oxt, oxt.add(dir.scale(CAP_BOND))]);
    }

    let o = last.position("O").ok_or_else(|| missing("O"))?;
    let ca = last.position("CA").ok_or_else(|| missing("CA"))?;
    let mid = o.add(ca).scale(0.5);
    let dir = c.sub(mid).unit().ok_or_else(degenerate)?;
    let n = c.add(dir.scale(CAP_BOND));
    Ok([n, n.add(dir.scale(CAP_BOND))])
}

/// Add ACE and NME caps to every chain, drop terminal OXT atoms, renumber residues
/// from 1 across chains, and separate chains with TER.
pub fn add_caps(text: &str, rng: &mut impl Rng) -> Result<CappedStructure, CapError> {
    let mut chains: Vec<(char, Vec<Residue>)> = Vec::new();

    for line in text.lines() {
        match record(line) {
            "HETATM" | "CONECT" | "MASTER" => return Err(CapError::HeteroRecords),
            "ATOM" => {}
            _ => continue,
        }
        let atom = Atom::parse(line).ok_or_else(|| CapError::UnreadableAtom(line.to_string()))?;

        let slot = match chains.iter().position(|(id, _)| *id == atom.chain) {
            Some(i) => i,
            None => {
                chains.push((atom.chain, Vec::new()));
                chains.len() - 1
            }
        };
        let residues = &mut chains[slot].1;
        let same_residue = residues.last().is_some_and(|r: &Residue| {
            let head = &r.atoms[0];
            head.res_key == atom.res_key && head.resname == atom.resname
        });
        if same_residue {
            if let Some(r) = residues.last_mut() {
                r.atoms.push(atom);
            }
        } else {
            residues.push(Residue { atoms: vec![atom] });
        }
    }

    if chains.is_empty() {
        return Err(CapError::NoAtoms);
    }

    let mut out = String::new();
    let mut serial = 0usize;
    let mut resseq = 0usize;

    for (chain, residues) in &chains {
        let (Some(first), Some(last)) = (residues.first(), residues.last()) else {
            continue;
        };
        let ace = ace_positions(first, *chain, rng)?;
        let nme = nme_positions(last, *chain)?;

        resseq += 1;
        for (name, pos) in ["C", "CH3", "O"].into_iter().zip(ace) {
            serial += 1;
            push_line(&mut out, &Atom::cap(name, "ACE", *chain, pos).to_line(serial, resseq));
        }

        let last_index = residues.len() - 1;
        for (i, residue) in residues.iter().enumerate() {
            resseq += 1;
            for atom in &residue.atoms {
                if i == last_index && atom.name == "OXT" {
                    continue;
                }
                serial += 1;
                push_line(&mut out, &atom.to_line(serial, resseq));
            }
        }

        resseq += 1;
        for (name, pos) in ["N", "C"].into_iter().zip(nme) {
            serial += 1;
            push_line(&mut out, &Atom::cap(name, "NME", *chain, pos).to_line(serial, resseq));
        }
        out.push_str("TER\n");
    }
    out.push_str("END\n");

    Ok(CappedStructure {
        text: out,
        chains: chains.len(),
        residues: resseq,
    })
}
