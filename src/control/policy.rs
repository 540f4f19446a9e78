use crate::control::controller::{Controller, ControllerResult};
use crate::control::inputs::Input;
use crate::model::{BaseNode, NodeEvent};
use crate::utils::CancelToken;
use std::ops::ControlFlow;

pub trait Policy<E: NodeEvent> {
    fn handle(&mut self, inp: Input<E>) -> ControlFlow<ControllerResult>;
}

pub struct WithNode<'m, N: BaseNode> {
    pub node: &'m mut N,
    pub cfg: &'m mut N::Config,
    pub cancel: &'m CancelToken,
    pub stop_timeout_secs: u64,
}

impl<'m, N: BaseNode> Policy<N::Event> for WithNode<'m, N> {
    #[inline(always)]
    fn handle(&mut self, inp: Input<N::Event>) -> ControlFlow<ControllerResult> {
        Controller::<N>::handle_with_node(inp, self)
    }
}

pub struct NoNode<'m, N: BaseNode> {
    pub cfg: &'m mut N::Config,
}

impl<'m, N: BaseNode> Policy<N::Event> for NoNode<'m, N> {
    #[inline(always)]
    fn handle(&mut self, inp: Input<N::Event>) -> ControlFlow<ControllerResult> {
        Controller::<N>::handle_no_node(inp, self.cfg)
    }
}
