/// Path constraints recorded at branches during tracing

use z3::ast::Bool;

#[derive(Debug, Clone)]
pub struct BranchConstraint<'ctx> {
    pub taken: bool,
    pub src: u64,
    pub dst: u64,
    pub predicate: Bool<'ctx>,
}

/// All outgoing edges of one executed branch. At most one edge is taken.
#[derive(Debug, Clone)]
pub struct PathConstraint<'ctx> {
    branches: Vec<BranchConstraint<'ctx>>,
    symbolic: bool,
    thread_id: u64,
}

impl<'ctx> PathConstraint<'ctx> {
    pub fn new(thread_id: u64, symbolic: bool) -> Self {
        PathConstraint { branches: Vec::new(), symbolic, thread_id }
    }

    pub fn add_branch(&mut self, taken: bool, src: u64, dst: u64, predicate: Bool<'ctx>) {
        if taken {
            for branch in self.branches.iter_mut() {
                branch.taken = false;
            }
        }
        self.branches.push(BranchConstraint { taken, src, dst, predicate });
    }

    pub fn branches(&self) -> &[BranchConstraint<'ctx>] {
        &self.branches
    }

    pub fn is_multiple_branches(&self) -> bool {
        self.branches.len() > 1
    }

    // Whether the predicates depend on a symbolic variable
    pub fn is_symbolic(&self) -> bool {
        self.symbolic
    }

    pub fn thread_id(&self) -> u64 {
        self.thread_id
    }

    pub fn source_address(&self) -> Option<u64> {
        self.branches.first().map(|b| b.src)
    }

    pub fn taken_branch(&self) -> Option<&BranchConstraint<'ctx>> {
        self.branches.iter().find(|b| b.taken)
    }

    pub fn taken_predicate(&self) -> Option<&Bool<'ctx>> {
        self.taken_branch().map(|b| &b.predicate)
    }

    pub fn taken_address(&self) -> Option<u64> {
        self.taken_branch().map(|b| b.dst)
    }

    // Marks the edge towards `dst` as the taken one
    fn take(&mut self, dst: u64) -> bool {
        if !self.branches.iter().any(|b| b.dst == dst) {
            return false;
        }
        for branch in self.branches.iter_mut() {
            branch.taken = branch.dst == dst;
        }
        true
    }
}

/// Append-only list of path constraints, indexed by position.
#[derive(Debug, Clone, Default)]
pub struct PathConstraints<'ctx> {
    constraints: Vec<PathConstraint<'ctx>>,
}

impl<'ctx> PathConstraints<'ctx> {
    pub fn new() -> Self {
        PathConstraints { constraints: Vec::new() }
    }

    pub fn push(&mut self, constraint: PathConstraint<'ctx>) -> usize {
        self.constraints.push(constraint);
        self.constraints.len() - 1
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PathConstraint<'ctx>> {
        self.constraints.get(index)
    }

    pub fn last(&self) -> Option<&PathConstraint<'ctx>> {
        self.constraints.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathConstraint<'ctx>> {
        self.constraints.iter()
    }

    /// Replaces the taken edge of the last constraint by the edge towards `dst`, in one step.
    /// Leaves the list untouched and returns false when no such edge exists.
    pub fn flip_last(&mut self, dst: u64) -> bool {
        match self.constraints.last_mut() {
            Some(last) => last.take(dst),
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.constraints.clear();
    }
}
