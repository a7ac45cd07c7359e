// tools/forktree/src/tree.rs
//! Arbre binaire de processus construit par `fork()` COW.
//!
//! Chaque environnement lit son nom sur sa pile, l'affiche, puis crée un
//! enfant par branche (`'0'`, `'1'`) tant que le nom est plus court que la
//! profondeur demandée. Le nom de l'enfant est écrit sur la pile du parent
//! juste avant le fork : l'enfant le retrouve dans sa copie COW.
//!
//! Le substrat simulé n'exécute qu'un environnement à la fois ; les enfants
//! attendent dans une file et reprennent dans `fork()` quand vient leur tour.

use std::collections::VecDeque;
use std::fmt;

use anyhow::{anyhow, bail, ensure, Result};
use exofork::sim::{SimConfig, SimEnv, SimKernel};
use exofork::{fork, pageref, EnvId, ForkReturn, PteFlags, Syscalls, VirtAddr};
use exofork_types::PGSIZE;

/// Profondeur maximale (le nom doit tenir dans son emplacement de pile)
pub const MAX_DEPTH: usize = 32;

const NAME_SLOT: usize = 64;
const TEXT: VirtAddr = VirtAddr::new(0x0080_0000);
const DATA: VirtAddr = VirtAddr::new(0x0080_1000);
/// Octets vérifiés en tête de chaque page de données
const STAMP_LEN: usize = 16;

/// Paramètres d'une exécution
#[derive(Debug, Clone, Copy)]
pub struct TreeConfig {
    pub depth: usize,
    /// Pages de données partagées par tout l'arbre
    pub pages: usize,
    /// Pages physiques du substrat simulé
    pub frames: usize,
}

/// Un environnement de l'arbre, tel qu'observé à sa sortie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: EnvId,
    pub parent: Option<EnvId>,
    pub name: String,
    pub faults: usize,
    /// Espaces qui partageaient la première page de données à la sortie
    pub sharers: u32,
}

#[derive(Debug)]
pub struct Report {
    pub nodes: Vec<Node>,
    pub peak_frames: usize,
    /// Pages encore allouées une fois tout l'arbre terminé
    pub leaked_frames: usize,
}

impl Report {
    pub fn total_faults(&self) -> usize {
        self.nodes.iter().map(|node| node.faults).sum()
    }

    pub fn max_sharers(&self) -> u32 {
        self.nodes.iter().map(|node| node.sharers).max().unwrap_or(0)
    }
}

/// Les erreurs du moteur sont `no_std` et n'implémentent que `Display`
trait Describe<T> {
    fn describe(self, what: &str) -> Result<T>;
}

impl<T, E: fmt::Display> Describe<T> for core::result::Result<T, E> {
    fn describe(self, what: &str) -> Result<T> {
        self.map_err(|err| anyhow!("{}: {}", what, err))
    }
}

struct Task {
    env: SimEnv,
    /// Faux pour la racine, qui n'est pas issue d'un fork
    resumes_in_fork: bool,
}

pub fn run(config: &TreeConfig) -> Result<Report> {
    ensure!(
        config.depth <= MAX_DEPTH,
        "depth {} exceeds {}",
        config.depth,
        MAX_DEPTH
    );

    let kernel = SimKernel::new(SimConfig::default_config().with_frames(config.frames));
    let root = kernel.spawn().describe("spawn")?;
    load(&root, config.pages)?;

    let mut queue = VecDeque::new();
    queue.push_back(Task { env: root, resumes_in_fork: false });

    let mut nodes = Vec::new();
    let mut peak_frames = kernel.frames_in_use();
    while let Some(task) = queue.pop_front() {
        let children = forktree(&task, config)?;
        peak_frames = peak_frames.max(kernel.frames_in_use());

        let id = task.env.id();
        nodes.push(Node {
            id,
            parent: kernel.parent(id),
            name: read_name(&task.env, cur_slot(&task.env))?,
            faults: kernel.fault_count(id),
            sharers: pageref(&task.env, DATA),
        });
        task.env.exit();

        for child in children {
            let env = kernel
                .env(child)
                .ok_or_else(|| anyhow!("child {} vanished", child))?;
            queue.push_back(Task { env, resumes_in_fork: true });
        }
    }

    let leaked_frames = kernel.frames_in_use();
    log::info!(
        "forktree: {} environments, peak {} frames, {} leaked",
        nodes.len(),
        peak_frames,
        leaked_frames
    );
    Ok(Report { nodes, peak_frames, leaked_frames })
}

/// Construit l'image initiale : texte en lecture seule, données, pile
fn load(env: &SimEnv, pages: usize) -> Result<()> {
    env.alloc_pages(TEXT, 1, PteFlags::USER_RW).describe("load text")?;
    env.write(TEXT, &[0x55, 0x89, 0xe5, 0xc3]).describe("load text")?;
    env.page_map(EnvId::SELF, TEXT, EnvId::SELF, TEXT, PteFlags::USER_RO)
        .describe("protect text")?;

    env.alloc_pages(DATA, pages, PteFlags::USER_RW).describe("load data")?;
    for page in 0..pages {
        env.write(data_page(page), &stamp(page)).describe("load data")?;
    }

    let stack = env.layout().ustack_page();
    env.alloc_pages(stack, 1, PteFlags::USER_RW).describe("load stack")?;
    write_name(env, cur_slot(env), "")
}

/// Corps d'un environnement de l'arbre ; retourne les enfants créés
fn forktree(task: &Task, config: &TreeConfig) -> Result<Vec<EnvId>> {
    let env = &task.env;
    let id = env.id();

    let name = if task.resumes_in_fork {
        match fork(env).describe("fork")? {
            ForkReturn::Child => {}
            ForkReturn::Parent(child) => bail!("[{}] resumed as parent of {}", id, child),
        }
        let name = read_name(env, nxt_slot(env))?;
        write_name(env, cur_slot(env), &name)?;
        name
    } else {
        read_name(env, cur_slot(env))?
    };

    verify_data(env, config.pages)?;
    println!("{:04x}: I am '{}'", id.as_u32(), name);

    let mut children = Vec::new();
    for branch in ['0', '1'] {
        if name.len() >= config.depth {
            break;
        }
        println!("[{:4x}]: cur: {}, branch: {}", id.as_u32(), name, branch);

        write_name(env, nxt_slot(env), &format!("{}{}", name, branch))?;
        match fork(env).describe("fork")? {
            ForkReturn::Parent(child) => children.push(child),
            ForkReturn::Child => bail!("[{}] resumed as child", id),
        }
    }
    Ok(children)
}

fn cur_slot(env: &SimEnv) -> VirtAddr {
    env.layout().ustack_page()
}

fn nxt_slot(env: &SimEnv) -> VirtAddr {
    cur_slot(env).offset(NAME_SLOT as u32)
}

fn data_page(page: usize) -> VirtAddr {
    DATA.offset((page * PGSIZE) as u32)
}

fn stamp(page: usize) -> [u8; STAMP_LEN] {
    let mut bytes = [0u8; STAMP_LEN];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = (page * 31 + i) as u8;
    }
    bytes
}

fn read_name(env: &SimEnv, slot: VirtAddr) -> Result<String> {
    let raw = env.read_vec(slot, NAME_SLOT).describe("read name")?;
    let len = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    Ok(String::from_utf8(raw[..len].to_vec())?)
}

fn write_name(env: &SimEnv, slot: VirtAddr, name: &str) -> Result<()> {
    let mut buf = name.as_bytes().to_vec();
    buf.push(0);
    env.write(slot, &buf).describe("write name")
}

fn verify_data(env: &SimEnv, pages: usize) -> Result<()> {
    for page in 0..pages {
        let bytes = env.read_vec(data_page(page), STAMP_LEN).describe("read data")?;
        ensure!(
            bytes == stamp(page),
            "[{}] data page {} corrupted",
            env.id(),
            page
        );
    }
    Ok(())
}
