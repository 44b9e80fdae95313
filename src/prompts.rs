//! Prompt text for every language-model call in the workflow

const CLASSIFY_PROMPT: &str = "You are a conditional router node in a workflow graph. \
You can access a knowledge base about the documentation of a library, framework or API. \
Given the following user query, classify its intent as one of the following: \
'general' (for general questions related to the documentation, route to a retrieval-augmented generation node), \
'code' (for questions related to a specific piece of code, route to a code analysis node), or \
'clarification' (if the intent is unclear and more information is needed from the user). \
Respond with only one word: 'general', 'code', or 'clarification'.";

const GENERATE_PROMPT: &str = "You are an assistant for question-answering tasks. \
Use the following pieces of retrieved context to answer the question. \
If you don't know the answer, just say that you don't know. \
Use three sentences maximum and keep the answer concise.";

pub const GRADE_DOCUMENT_SYSTEM: &str = "You are a grader assessing relevance of a retrieved document to a user question. \
If the document contains keyword(s) or semantic meaning related to the user question, grade it as relevant. \
It does not need to be a stringent test. The goal is to filter out erroneous retrievals. \
Give a binary score 'yes' or 'no' score to indicate whether the document is relevant to the question.";

pub const GRADE_GROUNDEDNESS_SYSTEM: &str = "You are a grader assessing whether an LLM generation is grounded in / supported by a set of retrieved facts. \
Give a binary score 'yes' or 'no'. 'Yes' means that the answer is grounded in / supported by the set of facts.";

pub const GRADE_ANSWER_SYSTEM: &str = "You are a grader assessing whether an answer addresses / resolves a question. \
Give a binary score 'yes' or 'no'. 'Yes' means that the answer resolves the question.";

pub const REWRITE_SYSTEM: &str = "You are a question re-writer that converts an input question to a better version that is optimized \
for vectorstore retrieval. Look at the input and try to reason about the underlying semantic intent / meaning. \
Reply with the improved question only.";

/// Sent when the model returns a blank clarification request
pub const CLARIFICATION_FALLBACK: &str =
    "Could you add more detail about what you are asking, such as the feature or API involved?";

pub const CLASSIFY_MAX_TOKENS: u32 = 50;
pub const ANSWER_MAX_TOKENS: u32 = 400;

pub fn classify_intent(question: &str) -> String {
    format!("{CLASSIFY_PROMPT}\n\nUser query: {question}")
}

pub fn ask_clarification(question: &str) -> String {
    format!(
        "The user has made this question: '{question}'. \
However, since the question is unclear or some information is missing, \
please generate an answer asking the user to provide additional details. \
Make some suggestions in order to help the user to clarify the query. \
Return only the answer for the user.\n\
Answer (asking clarification):"
    )
}

pub fn generate_answer(question: &str, context: &str) -> String {
    format!("{GENERATE_PROMPT}\nQuestion: {question}\nContext: {context}\nAnswer:")
}

pub fn grade_document(document: &str, question: &str) -> String {
    format!("Retrieved document: \n\n {document} \n\n User question: {question}")
}

pub fn grade_groundedness(documents: &str, answer: &str) -> String {
    format!("Set of facts: \n\n {documents} \n\n LLM generation: {answer}")
}

pub fn grade_answer(question: &str, answer: &str) -> String {
    format!("User question: \n\n {question} \n\n LLM generation: {answer}")
}

pub fn rewrite_question(question: &str) -> String {
    format!("Here is the initial question: \n\n {question} \n Formulate an improved question.")
}
