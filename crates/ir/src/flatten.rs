use thiserror::Error;

use crate::{BlockType, Instr};

/// An unflattened instruction tree, as it appears in the binary encoding.
///
/// Every nested sequence keeps its terminator: a block, loop, or else arm
/// ends with [`Instr::End`], and the then-arm of an `if` that has an else arm
/// ends with [`Instr::Else`].
#[derive(Debug, PartialEq, Clone)]
pub enum Node {
    Instr(Instr),
    Block(BlockType, Vec<Node>),
    Loop(BlockType, Vec<Node>),
    If(BlockType, Vec<Node>, Vec<Node>),
}

impl From<Instr> for Node {
    fn from(value: Instr) -> Self {
        Node::Instr(value)
    }
}

/// An `else` arrived with no open `if` to attach to, or after that `if`
/// already had one.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("else outside of an if")]
pub struct UnexpectedElse;

#[derive(Debug)]
enum Open {
    Block(usize),
    Loop,
    If { at: usize, else_at: Option<usize> },
}

/// Incremental linearizer. Instructions are pushed in encoding order and the
/// targets of each `block`, `if` and `else` are patched when the matching
/// `end` arrives. Open constructs live on a heap stack, so nesting depth is
/// limited by memory rather than the native stack.
#[derive(Debug, Default)]
pub struct Flattener {
    base: usize,
    out: Vec<Instr>,
    open: Vec<Open>,
    closed: bool,
}

impl Flattener {
    /// Start a sequence whose first instruction sits at absolute position
    /// `base`.
    pub fn new(base: usize) -> Self {
        Self {
            base,
            ..Default::default()
        }
    }

    /// Constructs opened and not yet ended.
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// True once the `end` closing the outermost sequence has been pushed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn push(&mut self, instr: Instr) -> Result<(), UnexpectedElse> {
        let pc = self.out.len();
        match instr {
            Instr::Block { ty, .. } => {
                self.open.push(Open::Block(pc));
                self.out.push(Instr::Block { ty, target: 0 });
            }

            Instr::Loop { ty, .. } => {
                self.open.push(Open::Loop);
                self.out.push(Instr::Loop {
                    ty,
                    target: self.base + pc,
                });
            }

            Instr::If { ty, .. } => {
                self.open.push(Open::If { at: pc, else_at: None });
                self.out.push(Instr::If {
                    ty,
                    target: 0,
                    else_target: 0,
                });
            }

            Instr::Else { .. } => {
                match self.open.last_mut() {
                    Some(Open::If { else_at, .. }) if else_at.is_none() => *else_at = Some(pc),
                    _ => return Err(UnexpectedElse),
                }
                self.out.push(Instr::Else { target: 0 });
            }

            Instr::End => {
                self.out.push(Instr::End);
                self.close();
            }

            instr => self.out.push(instr),
        }
        Ok(())
    }

    fn close(&mut self) {
        let end = self.base + self.out.len();
        match self.open.pop() {
            None => self.closed = true,
            Some(Open::Loop) => {}
            Some(Open::Block(at)) => {
                if let Instr::Block { target, .. } = &mut self.out[at] {
                    *target = end;
                }
            }
            Some(Open::If { at, else_at }) => {
                let alternate = else_at.map_or(end, |pc| self.base + pc + 1);
                if let Instr::If {
                    target,
                    else_target,
                    ..
                } = &mut self.out[at]
                {
                    *target = end;
                    *else_target = alternate;
                }
                if let Some(Instr::Else { target }) = else_at.map(|pc| &mut self.out[pc]) {
                    *target = end;
                }
            }
        }
    }

    pub fn into_instrs(self) -> Vec<Instr> {
        self.out
    }
}

/// Linearize `nodes` into one instruction array whose first element sits at
/// absolute position `base`, resolving every structured branch target.
pub fn flatten(nodes: Vec<Node>, base: usize) -> Result<Vec<Instr>, UnexpectedElse> {
    let mut flat = Flattener::new(base);
    let mut pending = vec![nodes.into_iter()];

    while let Some(nodes) = pending.last_mut() {
        let Some(node) = nodes.next() else {
            pending.pop();
            continue;
        };

        match node {
            Node::Instr(instr) => flat.push(instr)?,

            Node::Block(ty, body) => {
                flat.push(Instr::Block { ty, target: 0 })?;
                pending.push(body.into_iter());
            }

            Node::Loop(ty, body) => {
                flat.push(Instr::Loop { ty, target: 0 })?;
                pending.push(body.into_iter());
            }

            Node::If(ty, consequent, alternate) => {
                flat.push(Instr::If {
                    ty,
                    target: 0,
                    else_target: 0,
                })?;
                pending.push(alternate.into_iter());
                pending.push(consequent.into_iter());
            }
        }
    }

    Ok(flat.into_instrs())
}
