//------------------------------------   Host node channel opening   ---------------------------------------------------

use crate::delegates::error::DelegateError;
use bitcoin::Txid;
use libjoin::ChannelRequest;
use std::future::Future;

/// The participant's channel node. A joint funding round opens channels in two steps: the node first prepares each
/// channel and hands out its funding address, and once the funding transaction is final it is told where the funding
/// output is.
pub trait ChannelHost {
    /// Starts opening a channel with `request.peer_id` and returns the address the channel must be funded to.
    fn start_channel_open(&self, request: &ChannelRequest) -> impl Future<Output = Result<String, DelegateError>> + Send;

    /// Abandons a channel open that was started but not completed.
    fn cancel_channel_open(&self, peer_id: &str) -> impl Future<Output = Result<(), DelegateError>> + Send;

    /// Tells the node that the channel with `peer_id` is funded by output `vout` of `txid`.
    fn complete_channel_open(
        &self,
        peer_id: &str,
        txid: Txid,
        vout: u32,
    ) -> impl Future<Output = Result<(), DelegateError>> + Send;

    /// Closes a channel whose opening was completed.
    fn close_channel(&self, peer_id: &str) -> impl Future<Output = Result<(), DelegateError>> + Send;
}
