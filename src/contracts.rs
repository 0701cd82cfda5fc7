//! Typed bindings for the on-chain coordination contract.

use alloy::sol;

sol! {
    #[sol(rpc)]
    interface ILlmService {
        event NewRequest(uint256 indexed requestId, uint8 redundancy);
        event Processed(uint256 indexed requestId, bool success);
        event ResultSubmitted(uint256 indexed requestId, address indexed node);
        event NodeAdded(address indexed node);
        event NodeRemoved(address indexed node);

        function getAuthorizedNodes() external view returns (address[] memory nodes);

        /// "OK" when this node may still submit; "request not found",
        /// "submitted" or "no consensus" otherwise.
        function checkSubmission(uint256 requestId, address node)
            external
            view
            returns (string memory status);

        function getRequestInfo(uint256 requestId)
            external
            view
            returns (
                bytes32 platform,
                bytes32 model,
                bytes32 prompt,
                string memory input,
                uint8 redundancy,
                bool returnContentWithinResultTag,
                bool storeResultOffchain,
                address caller,
                string memory callback,
                bytes memory args
            );

        function sendResult(uint256 requestId, string calldata result) external;
    }
}
